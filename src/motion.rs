//! Motion-gated frame admission.
//!
//! The gate compares each incoming frame against the last frame it admitted,
//! using mean absolute luma difference over a downsampled sample grid. Frames
//! that do not differ enough are skipped before they ever reach the frame
//! buffer, which keeps the recognizer from re-reading a static scene.
//!
//! The gate is driven only by caller-supplied frames, never the wall clock,
//! so it is deterministic and testable.

use crate::frame::Frame;

/// Samples per axis for the comparison grid (16x16 = 256 luma samples).
const GRID: usize = 16;

/// Default admission threshold: mean absolute luma delta on a 0..255 scale.
pub const DEFAULT_MOTION_THRESHOLD: f64 = 6.0;

/// Admission filter in front of the frame buffer.
///
/// Disabled gates admit everything. Enabled gates admit the first frame
/// unconditionally (no predecessor to compare against), then only frames
/// whose sampled difference from the last *admitted* frame exceeds the
/// threshold. Rejected frames leave the gate's reference frame untouched, so
/// slow drift eventually accumulates enough difference to pass.
#[derive(Debug)]
pub struct MotionGate {
    enabled: bool,
    threshold: f64,
    /// Luma sample grid of the last admitted frame, with its dimensions.
    last: Option<ReferenceGrid>,
}

#[derive(Debug)]
struct ReferenceGrid {
    samples: Vec<u8>,
    width: u32,
    height: u32,
}

impl MotionGate {
    pub fn new(enabled: bool, threshold: f64) -> Self {
        Self {
            enabled,
            threshold,
            last: None,
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, DEFAULT_MOTION_THRESHOLD)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Decide whether `frame` should be enqueued.
    ///
    /// Has no side effect on the frame buffer; callers that skip a rejected
    /// frame must still have advanced the frame counter beforehand.
    pub fn admit(&mut self, frame: &Frame) -> bool {
        if !self.enabled {
            return true;
        }

        let samples = sample_luma_grid(frame);
        let admit = match &self.last {
            None => true,
            // Dimension change means the comparison is meaningless; admit
            // and start over from this frame.
            Some(prev) if prev.width != frame.width || prev.height != frame.height => true,
            Some(prev) => mean_abs_delta(&prev.samples, &samples) > self.threshold,
        };

        if admit {
            self.last = Some(ReferenceGrid {
                samples,
                width: frame.width,
                height: frame.height,
            });
        }
        admit
    }

    /// Forget the reference frame. The next frame is admitted unconditionally.
    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Downsample the frame to a GRID x GRID grid of luma values.
fn sample_luma_grid(frame: &Frame) -> Vec<u8> {
    let mut samples = Vec::with_capacity(GRID * GRID);
    let bpp = frame.bytes_per_pixel.max(1) as usize;
    let width = frame.width.max(1) as usize;
    let height = frame.height.max(1) as usize;

    for gy in 0..GRID {
        for gx in 0..GRID {
            let x = gx * width / GRID;
            let y = gy * height / GRID;
            let offset = (y * width + x) * bpp;
            samples.push(luma_at(&frame.pixels, offset, bpp));
        }
    }
    samples
}

fn luma_at(pixels: &[u8], offset: usize, bpp: usize) -> u8 {
    if bpp >= 3 {
        match pixels.get(offset..offset + 3) {
            // BGR byte order.
            Some(bgr) => {
                let luma =
                    0.114 * bgr[0] as f64 + 0.587 * bgr[1] as f64 + 0.299 * bgr[2] as f64;
                luma as u8
            }
            None => 0,
        }
    } else {
        pixels.get(offset).copied().unwrap_or(0)
    }
}

fn mean_abs_delta(a: &[u8], b: &[u8]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return f64::MAX;
    }
    let total: u64 = a
        .iter()
        .zip(b)
        .map(|(x, y)| (*x as i64 - *y as i64).unsigned_abs())
        .sum();
    total as f64 / a.len() as f64
}
