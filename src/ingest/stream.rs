//! Network stream source.
//!
//! `UrlSource` decodes a network video endpoint (RTSP/MJPEG) at its native
//! rate. Real decode goes through GStreamer behind the `stream-gstreamer`
//! feature, with the pipeline built from a caller-supplied template (`{url}`
//! marker) or a built-in default. `stub://` URLs select a deterministic
//! synthetic backend used by tests and demos.
//!
//! Capture timestamps are wall clock: a live stream has no other time base.

use crate::epoch_ms_now;
use crate::error::{Result, StreamError};
use crate::ingest::{FrameProducer, SourceFrame};

/// Default GStreamer pipeline when the caller passes an empty template.
pub const DEFAULT_PIPELINE_TEMPLATE: &str = "rtspsrc location={url} latency=0 ! decodebin ! \
     videoconvert ! video/x-raw,format=BGR ! \
     appsink name=appsink sync=false max-buffers=2 drop=true";

/// Render the pipeline description for a URL.
///
/// An empty template selects the default; otherwise every `{url}` marker is
/// substituted.
pub fn render_pipeline(url: &str, template: &str) -> String {
    let template = if template.trim().is_empty() {
        DEFAULT_PIPELINE_TEMPLATE
    } else {
        template
    };
    template.replace("{url}", url)
}

/// Network stream frame source.
#[derive(Debug)]
pub struct UrlSource {
    backend: UrlBackend,
}

#[derive(Debug)]
enum UrlBackend {
    Synthetic(SyntheticUrlSource),
    #[cfg(feature = "stream-gstreamer")]
    Gstreamer(GstreamerUrlSource),
}

impl UrlSource {
    /// Open the stream and start decoding.
    pub fn connect(url: &str, pipeline_template: &str) -> Result<Self> {
        if url.trim().is_empty() {
            return Err(StreamError::Connection("stream url is empty".to_string()));
        }
        if url.starts_with("stub://") {
            log::info!("UrlSource: connected to {} (synthetic)", url);
            return Ok(Self {
                backend: UrlBackend::Synthetic(SyntheticUrlSource::new()),
            });
        }
        #[cfg(feature = "stream-gstreamer")]
        {
            Ok(Self {
                backend: UrlBackend::Gstreamer(GstreamerUrlSource::connect(
                    url,
                    pipeline_template,
                )?),
            })
        }
        #[cfg(not(feature = "stream-gstreamer"))]
        {
            let _ = pipeline_template;
            Err(StreamError::Connection(
                "network streams require the stream-gstreamer feature".to_string(),
            ))
        }
    }
}

impl FrameProducer for UrlSource {
    fn next_frame(&mut self) -> Result<Option<SourceFrame>> {
        match &mut self.backend {
            UrlBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "stream-gstreamer")]
            UrlBackend::Gstreamer(source) => source.next_frame(),
        }
    }

    fn frame_interval(&self) -> Option<std::time::Duration> {
        match &self.backend {
            // The synthetic scene has no decoder to pace it; emulate 10 fps.
            UrlBackend::Synthetic(_) => Some(std::time::Duration::from_millis(100)),
            #[cfg(feature = "stream-gstreamer")]
            UrlBackend::Gstreamer(_) => None,
        }
    }

    fn reconnect(&mut self) -> Result<()> {
        match &mut self.backend {
            UrlBackend::Synthetic(_) => Ok(()),
            #[cfg(feature = "stream-gstreamer")]
            UrlBackend::Gstreamer(source) => source.reconnect(),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests and demos
// ----------------------------------------------------------------------------

#[derive(Debug)]
struct SyntheticUrlSource {
    frame_count: u64,
    scene_state: u8,
}

impl SyntheticUrlSource {
    fn new() -> Self {
        Self {
            frame_count: 0,
            scene_state: 0,
        }
    }

    fn next_frame(&mut self) -> Result<Option<SourceFrame>> {
        self.frame_count += 1;
        Ok(Some(SourceFrame {
            pixels: synthetic_bgr_pixels(640, 480, self.frame_count, &mut self.scene_state),
            width: 640,
            height: 480,
            bytes_per_pixel: 3,
            epoch_ms: epoch_ms_now(),
        }))
    }
}

/// Synthetic BGR scene: static background with a state bump every 50 frames,
/// simulating a vehicle entering the view.
pub(crate) fn synthetic_bgr_pixels(
    width: u32,
    height: u32,
    frame_count: u64,
    scene_state: &mut u8,
) -> Vec<u8> {
    if frame_count % 50 == 0 {
        *scene_state = scene_state.wrapping_add(1);
    }
    let pixel_count = (width * height * 3) as usize;
    let mut pixels = vec![0u8; pixel_count];
    for (i, pixel) in pixels.iter_mut().enumerate() {
        *pixel = ((i as u64 + *scene_state as u64 * 16) % 256) as u8;
    }
    pixels
}

// ----------------------------------------------------------------------------
// Production source using GStreamer
// ----------------------------------------------------------------------------

#[cfg(feature = "stream-gstreamer")]
struct GstreamerUrlSource {
    url: String,
    pipeline_description: String,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    frame_count: u64,
}

#[cfg(feature = "stream-gstreamer")]
impl GstreamerUrlSource {
    fn connect(url: &str, pipeline_template: &str) -> Result<Self> {
        gstreamer::init()
            .map_err(|e| StreamError::Initialization(format!("initialize gstreamer: {}", e)))?;

        let pipeline_description = render_pipeline(url, pipeline_template);
        let (pipeline, appsink) = Self::build(&pipeline_description)?;
        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| StreamError::Connection(format!("start stream pipeline: {}", e)))?;
        log::info!("UrlSource: connected to {}", url);

        Ok(Self {
            url: url.to_string(),
            pipeline_description,
            pipeline,
            appsink,
            frame_count: 0,
        })
    }

    fn build(description: &str) -> Result<(gstreamer::Pipeline, gstreamer_app::AppSink)> {
        let pipeline = gstreamer::parse::launch(description)
            .map_err(|e| StreamError::Connection(format!("build stream pipeline: {}", e)))?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| StreamError::Connection("pipeline is not a Pipeline".to_string()))?;

        let appsink = pipeline
            .by_name("appsink")
            .ok_or_else(|| {
                StreamError::Connection("appsink element missing from pipeline".to_string())
            })?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| {
                StreamError::Connection("appsink element has unexpected type".to_string())
            })?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "BGR")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(2);
        appsink.set_drop(true);
        appsink.set_sync(false);

        Ok((pipeline, appsink))
    }

    fn next_frame(&mut self) -> Result<Option<SourceFrame>> {
        self.poll_bus()?;

        let sample = self
            .appsink
            .try_pull_sample(gstreamer::ClockTime::from_mseconds(500))
            .ok_or_else(|| StreamError::Connection("stream stalled".to_string()))?;

        let (pixels, width, height) = sample_to_pixels(&sample)?;
        self.frame_count += 1;

        Ok(Some(SourceFrame {
            pixels,
            width,
            height,
            bytes_per_pixel: 3,
            epoch_ms: epoch_ms_now(),
        }))
    }

    fn reconnect(&mut self) -> Result<()> {
        let _ = self.pipeline.set_state(gstreamer::State::Null);
        let (pipeline, appsink) = Self::build(&self.pipeline_description)?;
        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| StreamError::Connection(format!("restart stream pipeline: {}", e)))?;
        self.pipeline = pipeline;
        self.appsink = appsink;
        log::info!("UrlSource: reconnected to {}", self.url);
        Ok(())
    }

    fn poll_bus(&mut self) -> Result<()> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    return Err(StreamError::Connection(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    )));
                }
                MessageView::Eos(..) => {
                    return Err(StreamError::Connection(
                        "gstreamer reached EOS".to_string(),
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(feature = "stream-gstreamer")]
impl Drop for GstreamerUrlSource {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gstreamer::State::Null);
    }
}

#[cfg(feature = "stream-gstreamer")]
fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
    let buffer = sample
        .buffer()
        .ok_or_else(|| StreamError::Connection("sample missing buffer".to_string()))?;
    let caps = sample
        .caps()
        .ok_or_else(|| StreamError::Connection("sample missing caps".to_string()))?;
    let info = gstreamer_video::VideoInfo::from_caps(caps)
        .map_err(|e| StreamError::Connection(format!("parse caps as video info: {}", e)))?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride(0) as usize;

    let map = buffer
        .map_readable()
        .map_err(|e| StreamError::Connection(format!("map sample buffer: {}", e)))?;
    let data = map.as_slice();

    if stride == row_bytes {
        return Ok((data.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(data.get(start..end).ok_or_else(|| {
            StreamError::Connection("sample buffer row is out of bounds".to_string())
        })?);
    }

    Ok((pixels, width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_source_produces_bgr_frames() {
        let mut source = UrlSource::connect("stub://front_gate", "").unwrap();
        let frame = source.next_frame().unwrap().expect("frame");
        assert_eq!(frame.width, 640);
        assert_eq!(frame.height, 480);
        assert_eq!(frame.bytes_per_pixel, 3);
        assert_eq!(frame.pixels.len(), 640 * 480 * 3);
    }

    #[test]
    fn empty_url_is_a_connection_error() {
        let err = UrlSource::connect("", "").unwrap_err();
        assert!(matches!(err, StreamError::Connection(_)));
    }

    #[test]
    fn pipeline_template_substitutes_url() {
        let rendered = render_pipeline("rtsp://cam/stream", "uridecodebin uri={url} ! appsink");
        assert_eq!(rendered, "uridecodebin uri=rtsp://cam/stream ! appsink");
    }

    #[test]
    fn empty_template_falls_back_to_default() {
        let rendered = render_pipeline("rtsp://cam/stream", "");
        assert!(rendered.contains("rtspsrc location=rtsp://cam/stream"));
        assert!(rendered.contains("appsink"));
    }
}
