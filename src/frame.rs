//! Frames and the bounded frame buffer.
//!
//! `Frame` is one captured image plus metadata. `FrameBuffer` is the single
//! shared-mutable structure between ingestion threads and the caller's batch
//! loop: a fixed-capacity FIFO guarded by an internal lock.
//!
//! Overflow policy: **evict-oldest**. A live stream must not stall its decode
//! thread on a slow consumer, so a push against a full buffer drops the
//! oldest pending frame and admits the new one. File ingestion additionally
//! back-pressures before pushing (see `ingest`), so file replay does not
//! rely on eviction.

use std::collections::VecDeque;
use std::sync::Mutex;

/// One captured frame awaiting recognition.
///
/// Frames are created by the ingestion layer, owned by the buffer while
/// queued, and consumed (moved out) by batch processing.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Raw pixel data, `width * height * bytes_per_pixel` bytes (BGR order
    /// for 3-byte pixels, matching what recognizers expect).
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: u32,
    /// Capture time, epoch milliseconds.
    pub epoch_ms: i64,
    /// Globally monotonic per-stream frame number. Advances even for frames
    /// the motion gate rejects, so numbering reflects capture order.
    pub frame_number: u64,
}

impl Frame {
    /// Expected pixel byte length for the declared dimensions.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.bytes_per_pixel as usize
    }
}

/// Fixed-capacity FIFO of pending frames.
///
/// Thread-safe: ingestion threads push while the caller pops batches. All
/// access serializes through one internal mutex, so FIFO order is preserved
/// and no frame is duplicated or lost under concurrency.
#[derive(Debug)]
pub struct FrameBuffer {
    queue: Mutex<VecDeque<Frame>>,
    capacity: usize,
}

impl FrameBuffer {
    /// Create a buffer with fixed capacity. Capacity is never resized.
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Enqueue a frame, evicting the oldest frame first when full.
    ///
    /// Returns the queue size after the push.
    pub fn push(&self, frame: Frame) -> usize {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        while queue.len() >= self.capacity {
            if let Some(dropped) = queue.pop_front() {
                log::warn!(
                    "frame buffer full (capacity {}), evicting frame {}",
                    self.capacity,
                    dropped.frame_number
                );
            }
        }
        queue.push_back(frame);
        queue.len()
    }

    /// Dequeue up to `max_n` frames, oldest first. Non-blocking: returns
    /// whatever is available, possibly nothing.
    pub fn pop_batch(&self, max_n: usize) -> Vec<Frame> {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        let take = max_n.min(queue.len());
        queue.drain(..take).collect()
    }

    /// Number of frames currently queued.
    pub fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
