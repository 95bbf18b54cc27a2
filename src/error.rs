//! Error taxonomy for the streaming engine.
//!
//! Capacity overflow is intentionally absent: the frame buffer evicts the
//! oldest frame instead of failing the push (see `FrameBuffer`). Background
//! ingestion failures never surface here either; they are captured into the
//! source status and queried out of band.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    /// Engine construction failed. Not recoverable without re-initializing.
    #[error("initialization failed: {0}")]
    Initialization(String),

    /// Stream or file could not be reached/opened.
    #[error("connection failed: {0}")]
    Connection(String),

    /// A url-stream or file source is already attached to this stream.
    #[error("source already connected: {0}")]
    AlreadyConnected(String),

    /// Operation is not valid in the current state (e.g. a disposed handle).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Pixel buffer does not match the declared dimensions.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// The external recognizer reported a failure.
    #[error("recognition failed: {0}")]
    Recognition(String),
}

pub type Result<T> = std::result::Result<T, StreamError>;
