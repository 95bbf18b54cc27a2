//! Frame ingestion sources.
//!
//! Two push-based sources feed the frame buffer from their own background
//! thread:
//! - network streams (`stream::UrlSource`), decoding at the source's native
//!   rate with wall-clock capture timestamps
//! - local video files (`file::FileSource`), paced at the file's frame
//!   interval with timestamps derived from a caller-supplied start epoch
//!
//! Both have a deterministic synthetic backend selected by `stub://`
//! URLs/paths, so the whole pipeline runs without GStreamer or FFmpeg. The
//! third ingestion path, raw push, has no thread: it is a direct
//! gate-then-push on the caller's thread (see `PlateStream::push_frame`).
//!
//! Worker threads never panic across the thread boundary. Failures are
//! recorded into the shared `SourceStatus` and, for streams, retried with
//! capped backoff. Disconnecting signals the thread and joins it before
//! returning, so stopping is safe even mid-decode, and stopping twice is a
//! no-op.

pub mod file;
pub mod stream;

pub use file::FileSource;
pub use stream::UrlSource;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::error::{Result, StreamError};
use crate::frame::{Frame, FrameBuffer};
use crate::motion::MotionGate;

const BACKOFF_INITIAL: Duration = Duration::from_millis(250);
const BACKOFF_MAX: Duration = Duration::from_secs(5);
const BACKPRESSURE_POLL: Duration = Duration::from_millis(5);
const SHUTDOWN_POLL: Duration = Duration::from_millis(20);

/// One decoded frame as produced by a source backend, before it is numbered
/// and gated.
pub(crate) struct SourceFrame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: u32,
    pub epoch_ms: i64,
}

/// A decoded-frame producer driven by the ingest worker thread.
pub(crate) trait FrameProducer: Send {
    /// Decode the next frame. `Ok(None)` means clean end of input.
    fn next_frame(&mut self) -> Result<Option<SourceFrame>>;

    /// Pacing delay between decodes. File sources return the frame interval;
    /// native-rate sources return `None`.
    fn frame_interval(&self) -> Option<Duration> {
        None
    }

    /// Attempt to re-establish the source after a transient failure.
    /// Sources that cannot recover keep the default.
    fn reconnect(&mut self) -> Result<()> {
        Err(StreamError::Connection(
            "source does not support reconnection".to_string(),
        ))
    }
}

/// Shared status of a running (or finished) ingestion source.
///
/// Queried by the caller without blocking the worker; errors inside the
/// worker land here instead of propagating as panics.
#[derive(Debug)]
pub struct SourceStatus {
    active: AtomicBool,
    frames_ingested: AtomicU64,
    frames_skipped: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl SourceStatus {
    fn new() -> Self {
        Self {
            active: AtomicBool::new(true),
            frames_ingested: AtomicU64::new(0),
            frames_skipped: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    /// True while the worker thread is producing frames.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Frames pushed into the buffer (after motion gating).
    pub fn frames_ingested(&self) -> u64 {
        self.frames_ingested.load(Ordering::SeqCst)
    }

    /// Frames the motion gate rejected.
    pub fn frames_skipped(&self) -> u64 {
        self.frames_skipped.load(Ordering::SeqCst)
    }

    /// Most recent worker error, if any.
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn record_error(&self, message: String) {
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(message);
    }

    fn set_inactive(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

/// Everything a worker thread needs from the owning stream.
pub(crate) struct WorkerContext {
    pub buffer: Arc<FrameBuffer>,
    pub gate: Arc<Mutex<MotionGate>>,
    pub frame_counter: Arc<AtomicU64>,
    /// Sleep while the buffer is full instead of relying on eviction.
    /// Enabled for file replay, disabled for live streams.
    pub backpressure: bool,
}

/// Handle to a running ingestion worker.
///
/// `stop` signals the thread, waits for it to observe the signal, and joins
/// it; calling it again (or on a finished worker) is a no-op.
#[derive(Debug)]
pub(crate) struct IngestHandle {
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
    status: Arc<SourceStatus>,
}

impl IngestHandle {
    pub fn status(&self) -> Arc<SourceStatus> {
        self.status.clone()
    }

    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                // Worker bodies catch their own errors; a panic here is a bug
                // but must not take the caller down with it.
                self.status.record_error("ingest worker panicked".to_string());
            }
            self.status.set_inactive();
        }
    }
}

impl Drop for IngestHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Spawn the worker thread for a producer.
pub(crate) fn spawn_worker(
    name: &str,
    producer: Box<dyn FrameProducer>,
    ctx: WorkerContext,
) -> IngestHandle {
    let shutdown = Arc::new(AtomicBool::new(false));
    let status = Arc::new(SourceStatus::new());

    let worker_name = name.to_string();
    let worker_shutdown = shutdown.clone();
    let worker_status = status.clone();
    let join = std::thread::spawn(move || {
        run_worker(worker_name, producer, ctx, worker_shutdown, worker_status);
    });

    IngestHandle {
        shutdown,
        join: Some(join),
        status,
    }
}

fn run_worker(
    name: String,
    mut producer: Box<dyn FrameProducer>,
    ctx: WorkerContext,
    shutdown: Arc<AtomicBool>,
    status: Arc<SourceStatus>,
) {
    let mut backoff = BACKOFF_INITIAL;

    loop {
        if shutdown.load(Ordering::SeqCst) {
            log::info!("{}: worker stopping on disconnect", name);
            break;
        }

        if ctx.backpressure {
            wait_for_space(&ctx.buffer, &shutdown);
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
        }

        let produced = match producer.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                log::info!("{}: end of input after {} frames", name, status.frames_ingested());
                break;
            }
            Err(err) => {
                let message = err.to_string();
                log::warn!("{}: ingest error: {}", name, message);
                status.record_error(message);

                sleep_interruptible(backoff, &shutdown);
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                match producer.reconnect() {
                    Ok(()) => {
                        log::info!("{}: reconnected", name);
                        backoff = (backoff * 2).min(BACKOFF_MAX);
                        continue;
                    }
                    Err(reconnect_err) => {
                        status.record_error(reconnect_err.to_string());
                        break;
                    }
                }
            }
        };
        backoff = BACKOFF_INITIAL;

        // Number every captured frame, admitted or not, so frame numbers
        // stay monotone across motion-gate skips.
        let frame_number = ctx.frame_counter.fetch_add(1, Ordering::SeqCst);
        let frame = Frame {
            pixels: produced.pixels,
            width: produced.width,
            height: produced.height,
            bytes_per_pixel: produced.bytes_per_pixel,
            epoch_ms: produced.epoch_ms,
            frame_number,
        };

        let admitted = ctx
            .gate
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .admit(&frame);
        if admitted {
            ctx.buffer.push(frame);
            status.frames_ingested.fetch_add(1, Ordering::SeqCst);
        } else {
            status.frames_skipped.fetch_add(1, Ordering::SeqCst);
        }

        if let Some(interval) = producer.frame_interval() {
            sleep_interruptible(interval, &shutdown);
        }
    }

    status.set_inactive();
}

fn wait_for_space(buffer: &FrameBuffer, shutdown: &AtomicBool) {
    while buffer.len() >= buffer.capacity() && !shutdown.load(Ordering::SeqCst) {
        std::thread::sleep(BACKPRESSURE_POLL);
    }
}

/// Sleep in small slices so a disconnect is observed promptly.
fn sleep_interruptible(total: Duration, shutdown: &AtomicBool) {
    let deadline = Instant::now() + total;
    while Instant::now() < deadline && !shutdown.load(Ordering::SeqCst) {
        std::thread::sleep(SHUTDOWN_POLL.min(deadline.saturating_duration_since(Instant::now())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::MotionGate;

    struct CountingProducer {
        remaining: u32,
    }

    impl FrameProducer for CountingProducer {
        fn next_frame(&mut self) -> Result<Option<SourceFrame>> {
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            Ok(Some(SourceFrame {
                pixels: vec![self.remaining as u8; 12],
                width: 2,
                height: 2,
                bytes_per_pixel: 3,
                epoch_ms: 1_000,
            }))
        }
    }

    struct FailingProducer;

    impl FrameProducer for FailingProducer {
        fn next_frame(&mut self) -> Result<Option<SourceFrame>> {
            Err(StreamError::Connection("decode failed".to_string()))
        }
    }

    fn context(capacity: usize, backpressure: bool) -> WorkerContext {
        WorkerContext {
            buffer: Arc::new(FrameBuffer::new(capacity)),
            gate: Arc::new(Mutex::new(MotionGate::disabled())),
            frame_counter: Arc::new(AtomicU64::new(0)),
            backpressure,
        }
    }

    fn wait_until_inactive(status: &SourceStatus) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while status.is_active() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!status.is_active(), "worker did not finish in time");
    }

    #[test]
    fn worker_drains_producer_then_goes_inactive() {
        let ctx = context(16, false);
        let buffer = ctx.buffer.clone();
        let mut handle = spawn_worker("test", Box::new(CountingProducer { remaining: 5 }), ctx);
        let status = handle.status();

        wait_until_inactive(&status);
        assert_eq!(status.frames_ingested(), 5);
        assert_eq!(buffer.len(), 5);
        assert!(status.last_error().is_none());
        handle.stop();
    }

    #[test]
    fn failing_producer_records_error_instead_of_panicking() {
        let mut handle = spawn_worker("test", Box::new(FailingProducer), context(4, false));
        let status = handle.status();

        wait_until_inactive(&status);
        let err = status.last_error().expect("error recorded");
        assert!(err.contains("decode failed") || err.contains("reconnection"));
        handle.stop();
    }

    #[test]
    fn stop_is_idempotent() {
        let mut handle = spawn_worker("test", Box::new(CountingProducer { remaining: 2 }), context(4, false));
        handle.stop();
        handle.stop();
        assert!(!handle.status().is_active());
    }

    #[test]
    fn backpressure_waits_instead_of_evicting() {
        let ctx = context(3, true);
        let buffer = ctx.buffer.clone();
        let counter = ctx.frame_counter.clone();
        let mut handle = spawn_worker("test", Box::new(CountingProducer { remaining: 10 }), ctx);

        // Worker fills to capacity and then blocks; nothing is evicted.
        let deadline = Instant::now() + Duration::from_secs(5);
        while buffer.len() < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(buffer.len(), 3);

        // Drain everything; the worker finishes the remaining frames.
        let mut total = 0;
        let deadline = Instant::now() + Duration::from_secs(5);
        while total < 10 && Instant::now() < deadline {
            total += buffer.pop_batch(4).len();
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(total, 10);
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        handle.stop();
    }
}
