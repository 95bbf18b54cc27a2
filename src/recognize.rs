//! Recognition boundary.
//!
//! Plate recognition itself is an external service. The engine only needs a
//! per-frame call that turns pixels into ranked plate candidates; everything
//! else (model, GPU batching, character segmentation) stays behind the
//! `Recognizer` trait.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::Result;
use crate::frame::Frame;

/// One alternative reading of a plate with its score.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlateGuess {
    pub plate: String,
    pub confidence: f32,
}

/// A ranked plate reading for one region of one frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlateCandidate {
    /// Highest-confidence reading.
    pub best_plate: String,
    pub confidence: f32,
    /// Lower-ranked readings, best first.
    pub alternatives: Vec<PlateGuess>,
}

impl PlateCandidate {
    pub fn new(best_plate: impl Into<String>, confidence: f32) -> Self {
        Self {
            best_plate: best_plate.into(),
            confidence,
            alternatives: Vec::new(),
        }
    }

    pub fn with_alternative(mut self, plate: impl Into<String>, confidence: f32) -> Self {
        self.alternatives.push(PlateGuess {
            plate: plate.into(),
            confidence,
        });
        self
    }
}

/// Recognition output for one consumed frame.
///
/// Read-only once produced; the caller owns it after `process_batch` returns.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FrameResult {
    pub frame_number: u64,
    pub epoch_ms: i64,
    /// Plate candidates in recognizer order (typically best region first).
    pub plates: Vec<PlateCandidate>,
}

/// External plate-recognition service.
///
/// `recognize` is the required per-frame entry point. `recognize_batch` is an
/// optimization hook for engines that batch on the GPU; the default simply
/// loops, and correctness never depends on overriding it.
pub trait Recognizer {
    fn recognize(&mut self, frame: &Frame) -> Result<Vec<PlateCandidate>>;

    fn recognize_batch(&mut self, frames: &[Frame]) -> Result<Vec<Vec<PlateCandidate>>> {
        frames.iter().map(|frame| self.recognize(frame)).collect()
    }
}

/// Scripted recognizer for tests and demos.
///
/// Responds per frame number from a script, falling back to an optional
/// constant candidate, otherwise to no plates.
pub struct StubRecognizer {
    script: HashMap<u64, Vec<PlateCandidate>>,
    fallback: Option<PlateCandidate>,
    pub frames_processed: u64,
}

impl StubRecognizer {
    pub fn new() -> Self {
        Self {
            script: HashMap::new(),
            fallback: None,
            frames_processed: 0,
        }
    }

    /// Recognizer that reads the same plate in every frame.
    pub fn always(plate: impl Into<String>, confidence: f32) -> Self {
        let mut stub = Self::new();
        stub.fallback = Some(PlateCandidate::new(plate, confidence));
        stub
    }

    /// Script the response for one frame number.
    pub fn respond(mut self, frame_number: u64, candidates: Vec<PlateCandidate>) -> Self {
        self.script.insert(frame_number, candidates);
        self
    }
}

impl Default for StubRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Recognizer for StubRecognizer {
    fn recognize(&mut self, frame: &Frame) -> Result<Vec<PlateCandidate>> {
        self.frames_processed += 1;
        if let Some(candidates) = self.script.get(&frame.frame_number) {
            return Ok(candidates.clone());
        }
        Ok(self.fallback.clone().into_iter().collect())
    }
}
