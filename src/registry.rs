//! Process-wide stream registry.
//!
//! Callers hold an opaque `StreamId` instead of a pointer; every operation
//! resolves the id through the registry, so a disposed or never-initialized
//! handle can only produce `InvalidState`, never a dangling reference. The
//! registry itself is a lazily-initialized singleton with init-once
//! semantics.
//!
//! Lifecycle mirrors the loaded-flag discipline of the boundary contract:
//! `initialize` creates, `is_loaded` queries, `dispose` detaches any live
//! source (signalling and joining its thread) and removes the entry.
//! Disposing twice is a defensive no-op, never an error.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use crate::config::StreamConfig;
use crate::error::{Result, StreamError};
use crate::stream::PlateStream;

/// Opaque handle to a registered stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StreamId(u64);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn registry() -> &'static Mutex<HashMap<u64, Arc<PlateStream>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<u64, Arc<PlateStream>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Create a stream with the given queue capacity and motion detection flag,
/// defaults for everything else.
pub fn initialize(frame_queue_size: usize, use_motion_detection: bool) -> Result<StreamId> {
    initialize_with(StreamConfig::new(frame_queue_size, use_motion_detection))
}

/// Create a stream from a full configuration.
pub fn initialize_with(config: StreamConfig) -> Result<StreamId> {
    let stream = Arc::new(PlateStream::new(config)?);
    let id = NEXT_ID.fetch_add(1, Ordering::SeqCst);
    registry()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .insert(id, stream);
    log::info!("initialized stream {} (queue {})", id, config.frame_queue_size);
    Ok(StreamId(id))
}

/// True while the handle refers to a live (not yet disposed) stream.
pub fn is_loaded(id: StreamId) -> bool {
    registry()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .contains_key(&id.0)
}

/// Resolve a handle. Fails with `InvalidState` for disposed handles.
pub fn get(id: StreamId) -> Result<Arc<PlateStream>> {
    registry()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .get(&id.0)
        .cloned()
        .ok_or_else(|| {
            StreamError::InvalidState(format!("stream {} is disposed or was never initialized", id.0))
        })
}

/// Tear the stream down: detach any source (joining its thread) and drop
/// the engine state. Safe to call any number of times.
pub fn dispose(id: StreamId) {
    let removed = registry()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .remove(&id.0);
    if let Some(stream) = removed {
        // Join the ingest thread outside the registry lock.
        stream.disconnect_all();
        log::info!("disposed stream {}", id.0);
    }
}
