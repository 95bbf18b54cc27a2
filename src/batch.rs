//! Batch recognition dispatch.
//!
//! Pull-based: the caller drives `process` from its own loop. Each call
//! drains up to one batch from the frame buffer, hands the frames to the
//! external recognizer, forwards every result into the group tracker, and
//! returns the results in the same FIFO order the frames were dequeued.
//!
//! Frames are consumed on dequeue. If the recognizer fails mid-batch the
//! popped frames are lost with it; the error is returned and the caller
//! decides whether to keep the stream alive.

use crate::error::{Result, StreamError};
use crate::frame::FrameBuffer;
use crate::groups::GroupTracker;
use crate::recognize::{FrameResult, Recognizer};

#[derive(Debug)]
pub struct BatchProcessor {
    batch_size: usize,
}

impl BatchProcessor {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Run one batch. An empty buffer yields an empty vec, not an error.
    pub fn process(
        &self,
        buffer: &FrameBuffer,
        recognizer: &mut dyn Recognizer,
        tracker: &mut GroupTracker,
    ) -> Result<Vec<FrameResult>> {
        let frames = buffer.pop_batch(self.batch_size);
        if frames.is_empty() {
            return Ok(Vec::new());
        }

        let per_frame = recognizer.recognize_batch(&frames)?;
        if per_frame.len() != frames.len() {
            return Err(StreamError::Recognition(format!(
                "recognizer returned {} results for {} frames",
                per_frame.len(),
                frames.len()
            )));
        }

        let mut results = Vec::with_capacity(frames.len());
        for (frame, plates) in frames.into_iter().zip(per_frame) {
            let result = FrameResult {
                frame_number: frame.frame_number,
                epoch_ms: frame.epoch_ms,
                plates,
            };
            tracker.observe(&result);
            results.push(result);
            // `frame` drops here; pixels are released once the result exists.
        }

        log::debug!(
            "processed batch of {} frames, {} open groups",
            results.len(),
            tracker.open_count()
        );
        Ok(results)
    }
}
