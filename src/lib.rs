//! platestream — streaming license-plate recognition engine.
//!
//! The engine sits between video sources and an external plate recognizer:
//!
//! ```text
//! UrlSource / FileSource / push_frame
//!         │  (motion gate)
//!         ▼
//!    FrameBuffer ──▶ BatchProcessor ──▶ GroupTracker ──▶ peek / pop
//!                         │
//!                    Recognizer (external)
//! ```
//!
//! Ingestion is push-based: each attached source runs one cancellable
//! background thread that decodes frames, applies the motion gate and pushes
//! into the bounded frame buffer. Recognition is pull-based: the caller
//! drives `process_batch` from its own loop, and results are folded into
//! time-windowed plate groups on the way out.
//!
//! Handles are opaque ids into a process-wide registry (see `registry`);
//! disposing a handle is idempotent and joins any live ingest thread.
//!
//! # Module Structure
//!
//! - `frame`: `Frame` and the bounded, thread-safe `FrameBuffer`
//! - `motion`: motion-gated admission in front of the buffer
//! - `ingest`: url-stream and video-file sources plus the worker thread
//! - `recognize`: the external `Recognizer` boundary and result types
//! - `batch`: batch dispatch from buffer to recognizer to tracker
//! - `groups`: temporal plate-group tracking
//! - `stream`: `PlateStream`, one engine instance per feed
//! - `registry`: opaque handles, initialize/dispose lifecycle
//! - `config`: layered configuration (defaults, file, env)

use std::time::{SystemTime, UNIX_EPOCH};

pub mod batch;
pub mod config;
pub mod error;
pub mod frame;
pub mod groups;
pub mod ingest;
pub mod motion;
pub mod recognize;
pub mod registry;
pub mod stream;

pub use batch::BatchProcessor;
pub use config::StreamConfig;
pub use error::{Result, StreamError};
pub use frame::{Frame, FrameBuffer};
pub use groups::{
    GroupSettings, GroupTracker, PlateGroup, DEFAULT_EDIT_DISTANCE,
    DEFAULT_GROUP_IDLE_TIMEOUT_MS,
};
pub use ingest::stream::DEFAULT_PIPELINE_TEMPLATE;
pub use ingest::{FileSource, SourceStatus, UrlSource};
pub use motion::{MotionGate, DEFAULT_MOTION_THRESHOLD};
pub use recognize::{FrameResult, PlateCandidate, PlateGuess, Recognizer, StubRecognizer};
pub use registry::{dispose, initialize, initialize_with, is_loaded, StreamId};
pub use stream::PlateStream;

/// Current wall time as epoch milliseconds.
pub fn epoch_ms_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
