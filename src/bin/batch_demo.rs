//! batch_demo - synchronous raw-push batching walkthrough.
//!
//! Pushes synthetic BGR frames with fixed 100 ms timestamp spacing, runs a
//! batch whenever the queue fills, and prints per-frame results plus the
//! plate groups as they complete. Two scripted vehicles pass the camera with
//! a gap longer than the group idle timeout, so they come out as two groups.

use anyhow::Result;
use clap::Parser;

use platestream::{registry, PlateCandidate, StreamConfig, StubRecognizer};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Number of frames to push.
    #[arg(long, default_value_t = 60)]
    frames: u64,
    /// Frame buffer capacity.
    #[arg(long, default_value_t = 15)]
    queue_size: usize,
    /// Frames per process_batch call.
    #[arg(long, default_value_t = 10)]
    batch_size: usize,
    /// Epoch milliseconds of the first frame.
    #[arg(long, default_value_t = 1_500_294_710_000)]
    start_epoch_ms: i64,
}

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    println!("Initializing");
    let mut cfg = StreamConfig::default();
    cfg.frame_queue_size = args.queue_size;
    cfg.batch_size = args.batch_size;
    // Frames are pushed synchronously; gating adds nothing here.
    cfg.use_motion_detection = false;

    let id = registry::initialize_with(cfg)?;
    let stream = registry::get(id)?;
    let mut recognizer = scripted_recognizer(args.frames);
    println!("Initialization complete");

    for i in 0..args.frames {
        let pixels = synthetic_frame(i);
        let queue_size =
            stream.push_frame(&pixels, 3, WIDTH, HEIGHT, args.start_epoch_ms + i as i64 * 100)?;

        if queue_size >= args.batch_size || i == args.frames - 1 {
            for result in stream.process_batch(&mut recognizer)? {
                for plate in &result.plates {
                    println!(
                        "Frame {} result: {} ({:.2})",
                        result.frame_number, plate.best_plate, plate.confidence
                    );
                }
            }

            println!(
                "After batching there are: {} active groups",
                stream.peek_active_groups().len()
            );
            for group in stream.pop_completed_groups() {
                print_group(&group);
            }
        }
    }

    // No more frames will arrive; close out whatever is still open.
    for group in stream.flush_groups() {
        print_group(&group);
    }

    registry::dispose(id);
    println!("Done");
    Ok(())
}

fn print_group(group: &platestream::PlateGroup) {
    println!(
        "Group ({} - {}) {} [{} frames]",
        group.epoch_start_ms,
        group.epoch_end_ms,
        group.best_plate,
        group.frame_numbers.len()
    );
}

/// Two vehicles with an idle gap between them, plus one OCR slip each.
fn scripted_recognizer(frames: u64) -> StubRecognizer {
    let mut recognizer = StubRecognizer::new();
    for n in 0..frames.min(12) {
        let candidate = if n % 5 == 4 {
            PlateCandidate::new("A8C123", 0.41).with_alternative("ABC123", 0.38)
        } else {
            PlateCandidate::new("ABC123", 0.86)
        };
        recognizer = recognizer.respond(n, vec![candidate]);
    }
    for n in 40..frames.min(52) {
        let candidate = if n % 5 == 4 {
            PlateCandidate::new("XYZ7B9", 0.39).with_alternative("XYZ789", 0.36)
        } else {
            PlateCandidate::new("XYZ789", 0.84)
        };
        recognizer = recognizer.respond(n, vec![candidate]);
    }
    recognizer
}

/// Flat background with a moving bright bar, enough variation to look like
/// a scene without pulling in an image crate.
fn synthetic_frame(i: u64) -> Vec<u8> {
    let mut pixels = vec![32u8; (WIDTH * HEIGHT * 3) as usize];
    let bar_x = (i as u32 * 7) % WIDTH;
    for y in 0..HEIGHT {
        for x in bar_x..(bar_x + 12).min(WIDTH) {
            let offset = ((y * WIDTH + x) * 3) as usize;
            pixels[offset] = 220;
            pixels[offset + 1] = 200;
            pixels[offset + 2] = 180;
        }
    }
    pixels
}
