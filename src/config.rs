//! Engine configuration.
//!
//! Defaults work out of the box; a JSON config file named by
//! `PLATESTREAM_CONFIG` overrides them, and `PLATESTREAM_*` environment
//! variables override the file. Values are validated once after layering.

use serde::Deserialize;
use std::path::Path;

use crate::error::{Result, StreamError};
use crate::groups::{GroupSettings, DEFAULT_EDIT_DISTANCE, DEFAULT_GROUP_IDLE_TIMEOUT_MS};
use crate::motion::DEFAULT_MOTION_THRESHOLD;

const DEFAULT_FRAME_QUEUE_SIZE: usize = 30;
const DEFAULT_BATCH_SIZE: usize = 10;
const DEFAULT_USE_MOTION_DETECTION: bool = true;

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    frame_queue_size: Option<usize>,
    use_motion_detection: Option<bool>,
    motion_threshold: Option<f64>,
    batch_size: Option<usize>,
    groups: Option<GroupConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct GroupConfigFile {
    idle_timeout_ms: Option<i64>,
    max_edit_distance: Option<usize>,
}

/// Tunables for one stream engine instance.
#[derive(Clone, Copy, Debug)]
pub struct StreamConfig {
    /// Capacity of the frame buffer. Must be at least the batch size so one
    /// full batch can be buffered.
    pub frame_queue_size: usize,
    pub use_motion_detection: bool,
    /// Motion gate admission threshold (mean luma delta, 0..255 scale).
    pub motion_threshold: f64,
    /// Maximum frames handed to the recognizer per `process_batch` call.
    pub batch_size: usize,
    pub group: GroupSettings,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            frame_queue_size: DEFAULT_FRAME_QUEUE_SIZE,
            use_motion_detection: DEFAULT_USE_MOTION_DETECTION,
            motion_threshold: DEFAULT_MOTION_THRESHOLD,
            batch_size: DEFAULT_BATCH_SIZE,
            group: GroupSettings::default(),
        }
    }
}

impl StreamConfig {
    /// The two knobs every caller sets, defaults for the rest.
    pub fn new(frame_queue_size: usize, use_motion_detection: bool) -> Self {
        Self {
            frame_queue_size,
            use_motion_detection,
            ..Self::default()
        }
    }

    /// Layered load: defaults, then the `PLATESTREAM_CONFIG` file, then
    /// `PLATESTREAM_*` env overrides, then validation.
    pub fn load() -> Result<Self> {
        let file_cfg = match std::env::var("PLATESTREAM_CONFIG").ok().as_deref() {
            Some(path) if !path.trim().is_empty() => read_config_file(Path::new(path))?,
            _ => StreamConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: StreamConfigFile) -> Self {
        let groups = file.groups.unwrap_or_default();
        Self {
            frame_queue_size: file.frame_queue_size.unwrap_or(DEFAULT_FRAME_QUEUE_SIZE),
            use_motion_detection: file
                .use_motion_detection
                .unwrap_or(DEFAULT_USE_MOTION_DETECTION),
            motion_threshold: file.motion_threshold.unwrap_or(DEFAULT_MOTION_THRESHOLD),
            batch_size: file.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            group: GroupSettings {
                idle_timeout_ms: groups
                    .idle_timeout_ms
                    .unwrap_or(DEFAULT_GROUP_IDLE_TIMEOUT_MS),
                max_edit_distance: groups.max_edit_distance.unwrap_or(DEFAULT_EDIT_DISTANCE),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(value) = env_parse::<usize>("PLATESTREAM_QUEUE_SIZE")? {
            self.frame_queue_size = value;
        }
        if let Ok(raw) = std::env::var("PLATESTREAM_MOTION") {
            if !raw.trim().is_empty() {
                self.use_motion_detection = matches!(raw.trim(), "1" | "true" | "yes");
            }
        }
        if let Some(value) = env_parse::<f64>("PLATESTREAM_MOTION_THRESHOLD")? {
            self.motion_threshold = value;
        }
        if let Some(value) = env_parse::<usize>("PLATESTREAM_BATCH_SIZE")? {
            self.batch_size = value;
        }
        if let Some(value) = env_parse::<i64>("PLATESTREAM_GROUP_TIMEOUT_MS")? {
            self.group.idle_timeout_ms = value;
        }
        if let Some(value) = env_parse::<usize>("PLATESTREAM_EDIT_DISTANCE")? {
            self.group.max_edit_distance = value;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.frame_queue_size == 0 {
            return Err(StreamError::Initialization(
                "frame_queue_size must be at least 1".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(StreamError::Initialization(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.frame_queue_size < self.batch_size {
            return Err(StreamError::Initialization(format!(
                "frame_queue_size ({}) must hold at least one batch ({})",
                self.frame_queue_size, self.batch_size
            )));
        }
        if self.motion_threshold < 0.0 {
            return Err(StreamError::Initialization(
                "motion_threshold must be non-negative".to_string(),
            ));
        }
        if self.group.idle_timeout_ms <= 0 {
            return Err(StreamError::Initialization(
                "group idle_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<StreamConfigFile> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        StreamError::Initialization(format!(
            "failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;
    serde_json::from_str(&raw).map_err(|e| {
        StreamError::Initialization(format!("invalid config file {}: {}", path.display(), e))
    })
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().parse::<T>().map(Some).map_err(|_| {
            StreamError::Initialization(format!("{} has an unparseable value '{}'", key, raw))
        }),
        _ => Ok(None),
    }
}
