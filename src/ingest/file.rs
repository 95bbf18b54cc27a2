//! Video file source.
//!
//! `FileSource` reads a local video file and replays it into the frame
//! buffer at the file's encoded frame rate. Frame timestamps are synthetic:
//! `start_epoch_ms + frame_index * frame_interval`, so a recorded clip can
//! be processed as if it were captured at a chosen wall-clock time.
//!
//! The ingest worker paces decodes by the frame interval and back-pressures
//! against a full buffer, so file replay never loses frames to eviction.
//! Real decode goes through FFmpeg behind the `file-ffmpeg` feature;
//! `stub://` paths select a short deterministic synthetic clip.

use std::time::Duration;

use crate::error::{Result, StreamError};
use crate::ingest::stream::synthetic_bgr_pixels;
use crate::ingest::{FrameProducer, SourceFrame};

/// Frame count of the synthetic `stub://` clip.
const SYNTHETIC_CLIP_FRAMES: u64 = 30;
/// Frame rate of the synthetic clip. Fast on purpose so tests and demos
/// finish quickly.
const SYNTHETIC_CLIP_FPS: f64 = 100.0;

/// Video file frame source.
#[derive(Debug)]
pub struct FileSource {
    backend: FileBackend,
    start_epoch_ms: i64,
}

#[derive(Debug)]
enum FileBackend {
    Synthetic(SyntheticClip),
    #[cfg(feature = "file-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    /// Open a video file. `start_epoch_ms` anchors the first frame's
    /// timestamp; subsequent frames advance by the frame interval.
    pub fn open(path: &str, start_epoch_ms: i64) -> Result<Self> {
        if path.trim().is_empty() {
            return Err(StreamError::Connection("file path is empty".to_string()));
        }
        if path.starts_with("stub://") {
            log::info!("FileSource: opened {} (synthetic)", path);
            return Ok(Self {
                backend: FileBackend::Synthetic(SyntheticClip::new()),
                start_epoch_ms,
            });
        }
        if path.contains("://") {
            return Err(StreamError::Connection(
                "file ingestion only supports local paths".to_string(),
            ));
        }
        #[cfg(feature = "file-ffmpeg")]
        {
            Ok(Self {
                backend: FileBackend::Ffmpeg(FfmpegFileSource::open(path)?),
                start_epoch_ms,
            })
        }
        #[cfg(not(feature = "file-ffmpeg"))]
        {
            Err(StreamError::Connection(
                "video files require the file-ffmpeg feature".to_string(),
            ))
        }
    }

    /// Encoded frames per second of the opened file.
    pub fn fps(&self) -> f64 {
        match &self.backend {
            FileBackend::Synthetic(_) => SYNTHETIC_CLIP_FPS,
            #[cfg(feature = "file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.fps,
        }
    }

    fn interval_ms(&self) -> f64 {
        let fps = self.fps();
        if fps > 0.0 {
            1_000.0 / fps
        } else {
            100.0
        }
    }

    fn timestamp_for(&self, frame_index: u64) -> i64 {
        self.start_epoch_ms + (frame_index as f64 * self.interval_ms()) as i64
    }
}

impl FrameProducer for FileSource {
    fn next_frame(&mut self) -> Result<Option<SourceFrame>> {
        let (decoded, frame_index) = match &mut self.backend {
            FileBackend::Synthetic(clip) => (clip.next_frame(), clip.frames_decoded - 1),
            #[cfg(feature = "file-ffmpeg")]
            FileBackend::Ffmpeg(source) => {
                let decoded = source.next_frame()?;
                (decoded, source.frames_decoded.saturating_sub(1))
            }
        };

        let Some(mut frame) = decoded else {
            return Ok(None);
        };
        frame.epoch_ms = self.timestamp_for(frame_index);
        Ok(Some(frame))
    }

    fn frame_interval(&self) -> Option<Duration> {
        Some(Duration::from_secs_f64(self.interval_ms() / 1_000.0))
    }

    // No reconnect: a failed file open/decode is fatal for this source.
}

// ----------------------------------------------------------------------------
// Synthetic clip (stub://) for tests and demos
// ----------------------------------------------------------------------------

#[derive(Debug)]
struct SyntheticClip {
    frames_decoded: u64,
    scene_state: u8,
}

impl SyntheticClip {
    fn new() -> Self {
        Self {
            frames_decoded: 0,
            scene_state: 0,
        }
    }

    fn next_frame(&mut self) -> Option<SourceFrame> {
        if self.frames_decoded >= SYNTHETIC_CLIP_FRAMES {
            return None;
        }
        self.frames_decoded += 1;
        Some(SourceFrame {
            pixels: synthetic_bgr_pixels(320, 240, self.frames_decoded, &mut self.scene_state),
            width: 320,
            height: 240,
            bytes_per_pixel: 3,
            // Overwritten by FileSource::next_frame with the paced timestamp.
            epoch_ms: 0,
        })
    }
}

// ----------------------------------------------------------------------------
// Production decode using FFmpeg
// ----------------------------------------------------------------------------

#[cfg(feature = "file-ffmpeg")]
struct FfmpegFileSource {
    input: ffmpeg_next::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg_next::codec::decoder::Video,
    scaler: ffmpeg_next::software::scaling::Context,
    fps: f64,
    frames_decoded: u64,
    flushed: bool,
}

#[cfg(feature = "file-ffmpeg")]
impl FfmpegFileSource {
    fn open(path: &str) -> Result<Self> {
        use ffmpeg_next as ffmpeg;

        ffmpeg::init()
            .map_err(|e| StreamError::Initialization(format!("initialize ffmpeg: {}", e)))?;
        let input = ffmpeg::format::input(&path)
            .map_err(|e| StreamError::Connection(format!("open video file '{}': {}", path, e)))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| StreamError::Connection("file has no video track".to_string()))?;
        let stream_index = input_stream.index();
        let rate = input_stream.avg_frame_rate();
        let fps = if rate.denominator() != 0 {
            rate.numerator() as f64 / rate.denominator() as f64
        } else {
            0.0
        };

        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .map_err(|e| StreamError::Connection(format!("load decoder parameters: {}", e)))?;
        let decoder = context
            .decoder()
            .video()
            .map_err(|e| StreamError::Connection(format!("open video decoder: {}", e)))?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::BGR24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .map_err(|e| StreamError::Connection(format!("create scaler: {}", e)))?;

        log::info!("FileSource: opened {} ({:.2} fps)", path, fps);
        Ok(Self {
            input,
            stream_index,
            decoder,
            scaler,
            fps,
            frames_decoded: 0,
            flushed: false,
        })
    }

    fn next_frame(&mut self) -> Result<Option<SourceFrame>> {
        use ffmpeg_next as ffmpeg;

        let mut decoded = ffmpeg::frame::Video::empty();

        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                let mut bgr = ffmpeg::frame::Video::empty();
                self.scaler
                    .run(&decoded, &mut bgr)
                    .map_err(|e| StreamError::Connection(format!("scale frame: {}", e)))?;
                let (pixels, width, height) = frame_to_pixels(&bgr)?;
                self.frames_decoded += 1;
                return Ok(Some(SourceFrame {
                    pixels,
                    width,
                    height,
                    bytes_per_pixel: 3,
                    epoch_ms: 0,
                }));
            }

            if self.flushed {
                return Ok(None);
            }

            match self.input.packets().next() {
                Some((stream, packet)) if stream.index() == self.stream_index => {
                    self.decoder.send_packet(&packet).map_err(|e| {
                        StreamError::Connection(format!("send packet to decoder: {}", e))
                    })?;
                }
                Some(_) => continue,
                None => {
                    self.decoder.send_eof().map_err(|e| {
                        StreamError::Connection(format!("flush decoder: {}", e))
                    })?;
                    self.flushed = true;
                }
            }
        }
    }
}

#[cfg(feature = "file-ffmpeg")]
fn frame_to_pixels(frame: &ffmpeg_next::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        return Ok((data.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(data.get(start..end).ok_or_else(|| {
            StreamError::Connection("decoded frame row is out of bounds".to_string())
        })?);
    }

    Ok((pixels, width, height))
}
