//! platestreamd - drive a video stream through the recognition loop.
//!
//! Connects a stream URL (a `stub://` synthetic camera by default), runs the
//! pull-based batch loop until Ctrl-C, and prints completed plate groups as
//! JSON lines. The recognizer here is the scripted stub; a real deployment
//! plugs its engine in behind the same `Recognizer` trait.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use platestream::{registry, StreamConfig, StubRecognizer};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Stream URL (stub:// selects the synthetic camera).
    #[arg(long, default_value = "stub://camera")]
    url: String,
    /// GStreamer pipeline template override; {url} is the substitution
    /// marker. Empty uses the built-in default.
    #[arg(long, default_value = "")]
    pipeline: String,
    /// Frame buffer capacity.
    #[arg(long, default_value_t = 30)]
    queue_size: usize,
    /// Frames per process_batch call.
    #[arg(long, default_value_t = 10)]
    batch_size: usize,
    /// Disable the motion gate.
    #[arg(long)]
    no_motion: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    // File/env config supplies group settings; CLI wins for the rest.
    let mut cfg = StreamConfig::load()?;
    cfg.frame_queue_size = args.queue_size;
    cfg.use_motion_detection = !args.no_motion;
    cfg.batch_size = args.batch_size;

    let id = registry::initialize_with(cfg)?;
    let stream = registry::get(id)?;
    stream
        .connect_video_stream_url(&args.url, &args.pipeline)
        .with_context(|| format!("connect to {}", args.url))?;
    log::info!("streaming from {}", stream.get_stream_url()?);

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            running.store(false, Ordering::SeqCst);
        })
        .context("install ctrl-c handler")?;
    }

    let mut recognizer = StubRecognizer::always("DEMO42", 0.87);
    let mut frames_total = 0u64;

    while running.load(Ordering::SeqCst) {
        let results = stream.process_batch(&mut recognizer)?;
        frames_total += results.len() as u64;

        for group in stream.pop_completed_groups() {
            println!("{}", serde_json::to_string(&group)?);
        }

        if let Some(status) = stream.source_status() {
            if !status.is_active() {
                if let Some(err) = status.last_error() {
                    log::error!("source stopped: {}", err);
                }
                break;
            }
        }

        if results.is_empty() {
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    log::info!("shutting down after {} frames", frames_total);
    stream.disconnect_video_stream();
    for group in stream.flush_groups() {
        println!("{}", serde_json::to_string(&group)?);
    }
    registry::dispose(id);
    Ok(())
}
