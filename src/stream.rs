//! The stream engine: one `PlateStream` per video feed.
//!
//! A `PlateStream` bundles the frame buffer, motion gate, group tracker and
//! at most one attached ingestion source (url stream or video file). The
//! caller drives recognition pull-based through `process_batch`; ingestion
//! runs push-based on its own thread.
//!
//! Single consumer: one thread drives `process_batch`/`peek`/`pop` per
//! stream. Ingestion threads only ever touch the frame buffer and the
//! motion gate, both internally locked.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::batch::BatchProcessor;
use crate::config::StreamConfig;
use crate::error::{Result, StreamError};
use crate::frame::{Frame, FrameBuffer};
use crate::groups::{GroupTracker, PlateGroup};
use crate::ingest::{self, FileSource, IngestHandle, SourceStatus, UrlSource, WorkerContext};
use crate::motion::MotionGate;
use crate::recognize::{FrameResult, Recognizer};
use crate::epoch_ms_now;

/// One video feed with its buffer, gate, tracker and attached source.
#[derive(Debug)]
pub struct PlateStream {
    buffer: Arc<FrameBuffer>,
    gate: Arc<Mutex<MotionGate>>,
    frame_counter: Arc<AtomicU64>,
    /// Attachment transitions (connect/disconnect of either source kind)
    /// serialize on this mutex; at most one source is attached at a time.
    attached: Mutex<Option<Attachment>>,
    tracker: Mutex<GroupTracker>,
    batcher: BatchProcessor,
}

#[derive(Debug)]
struct Attachment {
    kind: SourceKind,
    handle: IngestHandle,
}

#[derive(Debug)]
enum SourceKind {
    Stream { url: String },
    File { path: String, fps: f64 },
}

impl SourceKind {
    fn describe(&self) -> String {
        match self {
            SourceKind::Stream { url } => format!("video stream '{}'", url),
            SourceKind::File { path, .. } => format!("video file '{}'", path),
        }
    }
}

impl PlateStream {
    pub fn new(config: StreamConfig) -> Result<Self> {
        if config.frame_queue_size == 0 {
            return Err(StreamError::Initialization(
                "frame queue size must be at least 1".to_string(),
            ));
        }
        if config.batch_size == 0 {
            return Err(StreamError::Initialization(
                "batch size must be at least 1".to_string(),
            ));
        }

        let gate = MotionGate::new(config.use_motion_detection, config.motion_threshold);
        Ok(Self {
            buffer: Arc::new(FrameBuffer::new(config.frame_queue_size)),
            gate: Arc::new(Mutex::new(gate)),
            frame_counter: Arc::new(AtomicU64::new(0)),
            attached: Mutex::new(None),
            tracker: Mutex::new(GroupTracker::new(config.group)),
            batcher: BatchProcessor::new(config.batch_size),
        })
    }

    /// Frames currently waiting for recognition.
    pub fn get_queue_size(&self) -> usize {
        self.buffer.len()
    }

    // ------------------------------------------------------------------
    // Raw push path (no background thread)
    // ------------------------------------------------------------------

    /// Push raw BGR pixel data onto the buffer from the calling thread.
    ///
    /// A negative `epoch_ms` means "use the current wall time". The frame
    /// number advances even when the motion gate rejects the frame, so
    /// numbering stays monotone across skips; a rejected frame leaves the
    /// queue untouched. Returns the queue size after the push.
    pub fn push_frame(
        &self,
        pixels: &[u8],
        bytes_per_pixel: u32,
        width: u32,
        height: u32,
        epoch_ms: i64,
    ) -> Result<usize> {
        let expected = width as usize * height as usize * bytes_per_pixel as usize;
        if expected == 0 || pixels.len() != expected {
            return Err(StreamError::InvalidFrame(format!(
                "{} pixel bytes for {}x{} at {} bytes/pixel (expected {})",
                pixels.len(),
                width,
                height,
                bytes_per_pixel,
                expected
            )));
        }

        let frame = Frame {
            pixels: pixels.to_vec(),
            width,
            height,
            bytes_per_pixel,
            epoch_ms: if epoch_ms < 0 { epoch_ms_now() } else { epoch_ms },
            frame_number: self.frame_counter.fetch_add(1, Ordering::SeqCst),
        };

        let admitted = self
            .gate
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .admit(&frame);
        if admitted {
            Ok(self.buffer.push(frame))
        } else {
            Ok(self.buffer.len())
        }
    }

    // ------------------------------------------------------------------
    // Url-stream attachment
    // ------------------------------------------------------------------

    /// Connect a network stream and start its decode thread.
    ///
    /// `pipeline_template` overrides the GStreamer pipeline (`{url}` is the
    /// substitution marker); empty selects the default. Fails with
    /// `AlreadyConnected` while any source is attached.
    pub fn connect_video_stream_url(&self, url: &str, pipeline_template: &str) -> Result<()> {
        let mut attached = self.attached.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = attached.as_ref() {
            return Err(StreamError::AlreadyConnected(existing.kind.describe()));
        }

        let source = UrlSource::connect(url, pipeline_template)?;
        let handle = ingest::spawn_worker(
            &format!("stream {}", url),
            Box::new(source),
            self.worker_context(false),
        );
        *attached = Some(Attachment {
            kind: SourceKind::Stream {
                url: url.to_string(),
            },
            handle,
        });
        Ok(())
    }

    /// URL of the attached stream.
    pub fn get_stream_url(&self) -> Result<String> {
        let attached = self.attached.lock().unwrap_or_else(|e| e.into_inner());
        match attached.as_ref().map(|a| &a.kind) {
            Some(SourceKind::Stream { url }) => Ok(url.clone()),
            _ => Err(StreamError::InvalidState(
                "no video stream attached".to_string(),
            )),
        }
    }

    /// Stop the stream decode thread and release the connection.
    ///
    /// Waits for the thread to observe the stop signal before returning.
    /// No-op when no stream is attached (idempotent).
    pub fn disconnect_video_stream(&self) {
        let mut attached = self.attached.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(
            attached.as_ref().map(|a| &a.kind),
            Some(SourceKind::Stream { .. })
        ) {
            if let Some(mut attachment) = attached.take() {
                attachment.handle.stop();
                log::info!("disconnected {}", attachment.kind.describe());
            }
        }
    }

    // ------------------------------------------------------------------
    // Video-file attachment
    // ------------------------------------------------------------------

    /// Open a video file and start its paced replay thread.
    ///
    /// `start_epoch_ms` anchors the first frame's timestamp. Fails with
    /// `AlreadyConnected` while any source is attached.
    pub fn connect_video_file(&self, path: &str, start_epoch_ms: i64) -> Result<()> {
        let mut attached = self.attached.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = attached.as_ref() {
            return Err(StreamError::AlreadyConnected(existing.kind.describe()));
        }

        let source = FileSource::open(path, start_epoch_ms)?;
        let fps = source.fps();
        let handle = ingest::spawn_worker(
            &format!("file {}", path),
            Box::new(source),
            self.worker_context(true),
        );
        *attached = Some(Attachment {
            kind: SourceKind::File {
                path: path.to_string(),
                fps,
            },
            handle,
        });
        Ok(())
    }

    /// Stop file replay. No-op when no file is attached (idempotent).
    pub fn disconnect_video_file(&self) {
        let mut attached = self.attached.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(
            attached.as_ref().map(|a| &a.kind),
            Some(SourceKind::File { .. })
        ) {
            if let Some(mut attachment) = attached.take() {
                attachment.handle.stop();
                log::info!("disconnected {}", attachment.kind.describe());
            }
        }
    }

    /// True while the file replay thread is still producing frames. False
    /// once the file reaches end-of-file, is disconnected, or none is
    /// attached.
    pub fn video_file_active(&self) -> bool {
        let attached = self.attached.lock().unwrap_or_else(|e| e.into_inner());
        match attached.as_ref() {
            Some(attachment) if matches!(attachment.kind, SourceKind::File { .. }) => {
                attachment.handle.status().is_active()
            }
            _ => false,
        }
    }

    /// Encoded frame rate of the attached video file.
    pub fn get_video_file_fps(&self) -> Result<f64> {
        let attached = self.attached.lock().unwrap_or_else(|e| e.into_inner());
        match attached.as_ref().map(|a| &a.kind) {
            Some(SourceKind::File { fps, .. }) => Ok(*fps),
            _ => Err(StreamError::InvalidState(
                "no video file attached".to_string(),
            )),
        }
    }

    /// Status of the attached source (frames ingested/skipped, last error).
    pub fn source_status(&self) -> Option<Arc<SourceStatus>> {
        let attached = self.attached.lock().unwrap_or_else(|e| e.into_inner());
        attached.as_ref().map(|a| a.handle.status())
    }

    /// Detach whatever source is connected. Used on dispose.
    pub(crate) fn disconnect_all(&self) {
        let mut attached = self.attached.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mut attachment) = attached.take() {
            attachment.handle.stop();
            log::info!("disconnected {}", attachment.kind.describe());
        }
    }

    // ------------------------------------------------------------------
    // Recognition and grouping
    // ------------------------------------------------------------------

    /// Drain up to one batch of frames through the recognizer.
    ///
    /// Results come back in dequeue order and have already been folded into
    /// the group tracker. An empty queue yields an empty vec.
    pub fn process_batch(&self, recognizer: &mut dyn Recognizer) -> Result<Vec<FrameResult>> {
        let mut tracker = self.tracker.lock().unwrap_or_else(|e| e.into_inner());
        self.batcher.process(&self.buffer, recognizer, &mut tracker)
    }

    /// Snapshot of the open plate groups. Never mutates tracker state.
    pub fn peek_active_groups(&self) -> Vec<PlateGroup> {
        self.tracker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .peek_active_groups()
    }

    /// Remove and return the groups that have closed since the last pop.
    pub fn pop_completed_groups(&self) -> Vec<PlateGroup> {
        self.tracker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_completed_groups()
    }

    /// Force-close all open groups and return every completed group.
    /// Useful after end-of-file when no further frames will arrive.
    pub fn flush_groups(&self) -> Vec<PlateGroup> {
        let mut tracker = self.tracker.lock().unwrap_or_else(|e| e.into_inner());
        tracker.flush();
        tracker.pop_completed_groups()
    }

    fn worker_context(&self, backpressure: bool) -> WorkerContext {
        WorkerContext {
            buffer: self.buffer.clone(),
            gate: self.gate.clone(),
            frame_counter: self.frame_counter.clone(),
            backpressure,
        }
    }
}

impl Drop for PlateStream {
    fn drop(&mut self) {
        // Attached workers hold clones of the buffer/gate, not of the
        // stream; still, join them so no thread outlives the handle.
        self.disconnect_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognize::StubRecognizer;

    fn config(queue: usize, motion: bool) -> StreamConfig {
        StreamConfig {
            frame_queue_size: queue,
            use_motion_detection: motion,
            ..StreamConfig::default()
        }
    }

    fn bgr(value: u8) -> Vec<u8> {
        vec![value; 32 * 32 * 3]
    }

    #[test]
    fn push_frame_returns_queue_size() {
        let stream = PlateStream::new(config(8, false)).unwrap();
        assert_eq!(stream.push_frame(&bgr(1), 3, 32, 32, 1_000).unwrap(), 1);
        assert_eq!(stream.push_frame(&bgr(2), 3, 32, 32, 1_100).unwrap(), 2);
        assert_eq!(stream.get_queue_size(), 2);
    }

    #[test]
    fn push_frame_rejects_short_pixel_buffers() {
        let stream = PlateStream::new(config(8, false)).unwrap();
        let err = stream.push_frame(&[0u8; 10], 3, 32, 32, 1_000).unwrap_err();
        assert!(matches!(err, StreamError::InvalidFrame(_)));
        assert_eq!(stream.get_queue_size(), 0);
    }

    #[test]
    fn negative_timestamp_uses_wall_clock() {
        let stream = PlateStream::new(config(8, false)).unwrap();
        let before = epoch_ms_now();
        stream.push_frame(&bgr(1), 3, 32, 32, -1).unwrap();
        let results = stream
            .process_batch(&mut StubRecognizer::always("ABC123", 0.9))
            .unwrap();
        assert!(results[0].epoch_ms >= before);
    }

    #[test]
    fn motion_gate_skips_identical_pushes_but_numbers_advance() {
        let stream = PlateStream::new(config(8, true)).unwrap();
        assert_eq!(stream.push_frame(&bgr(10), 3, 32, 32, 1_000).unwrap(), 1);
        // Identical frame: rejected, queue unchanged.
        assert_eq!(stream.push_frame(&bgr(10), 3, 32, 32, 1_100).unwrap(), 1);
        // Changed frame: admitted.
        assert_eq!(stream.push_frame(&bgr(200), 3, 32, 32, 1_200).unwrap(), 2);

        let results = stream
            .process_batch(&mut StubRecognizer::always("ABC123", 0.9))
            .unwrap();
        let numbers: Vec<u64> = results.iter().map(|r| r.frame_number).collect();
        // The skipped frame still consumed number 1.
        assert_eq!(numbers, vec![0, 2]);
    }

    #[test]
    fn only_one_source_may_be_attached() {
        let stream = PlateStream::new(config(64, false)).unwrap();
        stream.connect_video_stream_url("stub://camera", "").unwrap();

        let err = stream.connect_video_file("stub://clip", 0).unwrap_err();
        assert!(matches!(err, StreamError::AlreadyConnected(_)));
        let err = stream
            .connect_video_stream_url("stub://other", "")
            .unwrap_err();
        assert!(matches!(err, StreamError::AlreadyConnected(_)));

        stream.disconnect_video_stream();
        stream.connect_video_file("stub://clip", 0).unwrap();
        stream.disconnect_video_file();
    }

    #[test]
    fn stream_disconnect_is_idempotent() {
        let stream = PlateStream::new(config(64, false)).unwrap();
        stream.connect_video_stream_url("stub://camera", "").unwrap();
        assert_eq!(stream.get_stream_url().unwrap(), "stub://camera");
        stream.disconnect_video_stream();
        stream.disconnect_video_stream();
        assert!(stream.get_stream_url().is_err());
    }

    #[test]
    fn file_queries_require_an_attached_file() {
        let stream = PlateStream::new(config(64, false)).unwrap();
        assert!(!stream.video_file_active());
        assert!(matches!(
            stream.get_video_file_fps().unwrap_err(),
            StreamError::InvalidState(_)
        ));
    }

    #[test]
    fn disconnecting_a_file_does_not_touch_a_stream() {
        let stream = PlateStream::new(config(64, false)).unwrap();
        stream.connect_video_stream_url("stub://camera", "").unwrap();
        stream.disconnect_video_file();
        assert!(stream.get_stream_url().is_ok());
        stream.disconnect_video_stream();
    }

    #[test]
    fn zero_capacity_fails_initialization() {
        let err = PlateStream::new(config(0, false)).unwrap_err();
        assert!(matches!(err, StreamError::Initialization(_)));
    }
}
