//! GStreamer-backed camera device.
//!
//! The pipeline is rebuilt on every `open`, so a dropped RTSP session or an
//! unplugged USB camera recovers through the normal release/open cycle.

use gstreamer::prelude::*;
use std::time::Duration;

use super::device::{Device, DeviceSettings};
use crate::error::SourceError;
use crate::frame::{Frame, BYTES_PER_PIXEL};

const APPSINK_TAIL: &str =
    "videoconvert ! video/x-raw,format=RGB ! appsink name=appsink sync=false max-buffers=1 drop=true";

struct Pipeline {
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gstreamer::State::Null);
    }
}

pub struct GstreamerDevice {
    url: String,
    fps: f64,
    pipeline: Option<Pipeline>,
    dimensions: Option<(u32, u32)>,
}

impl GstreamerDevice {
    pub fn new(settings: &DeviceSettings) -> Self {
        Self {
            url: settings.url.clone(),
            fps: settings.fps,
            pipeline: None,
            dimensions: None,
        }
    }

    /// Map a source url onto a launch description.
    ///
    /// - `0`, `1`, … local camera index
    /// - `v4l2:///dev/videoN` local camera path
    /// - anything else goes through `uridecodebin`
    fn describe_pipeline(&self) -> String {
        let url = self.url.trim();
        if !url.is_empty() && url.chars().all(|c| c.is_ascii_digit()) {
            return format!("v4l2src device=/dev/video{url} ! {APPSINK_TAIL}");
        }
        if let Some(path) = url.strip_prefix("v4l2://") {
            return format!("v4l2src device={path} ! {APPSINK_TAIL}");
        }
        format!("uridecodebin uri={url} ! {APPSINK_TAIL}")
    }

    fn frame_timeout(&self) -> Duration {
        let period_ms = if self.fps > 0.0 {
            (4_000.0 / self.fps) as u64
        } else {
            500
        };
        Duration::from_millis(period_ms.max(500))
    }

    fn build(&self) -> Result<Pipeline, SourceError> {
        gstreamer::init().map_err(|err| SourceError::open(&self.url, err))?;
        let description = self.describe_pipeline();
        let pipeline = gstreamer::parse::launch(&description)
            .map_err(|err| SourceError::open(&self.url, err))?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| SourceError::open(&self.url, "launch description is not a pipeline"))?;
        let appsink = pipeline
            .by_name("appsink")
            .ok_or_else(|| SourceError::open(&self.url, "appsink element missing"))?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| SourceError::open(&self.url, "appsink element has unexpected type"))?;
        Ok(Pipeline { pipeline, appsink })
    }

    /// Surface bus errors and end-of-stream as a disconnect.
    fn poll_bus(&self, pipeline: &Pipeline) -> Result<(), SourceError> {
        let Some(bus) = pipeline.pipeline.bus() else {
            return Ok(());
        };
        while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    return Err(SourceError::disconnected(
                        &self.url,
                        format!(
                            "gstreamer error from {:?}: {}",
                            err.src().map(|s| s.path_string()),
                            err.error()
                        ),
                    ));
                }
                MessageView::Eos(..) => {
                    return Err(SourceError::disconnected(&self.url, "end of stream"));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl Device for GstreamerDevice {
    fn describe(&self) -> String {
        self.url.clone()
    }

    fn open(&mut self) -> Result<(), SourceError> {
        let pipeline = self.build()?;
        pipeline
            .pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|err| SourceError::open(&self.url, err))?;
        log::info!("gstreamer device {} playing", self.url);
        self.pipeline = Some(pipeline);
        Ok(())
    }

    fn release(&mut self) {
        if self.pipeline.take().is_some() {
            log::debug!("gstreamer device {} released", self.url);
        }
    }

    fn is_open(&self) -> bool {
        self.pipeline.is_some()
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        self.dimensions
    }

    fn read(&mut self) -> Result<Frame, SourceError> {
        let timeout = self.frame_timeout();
        let Some(pipeline) = self.pipeline.as_ref() else {
            return Err(SourceError::disconnected(&self.url, "device is not open"));
        };
        self.poll_bus(pipeline)?;
        let sample = pipeline
            .appsink
            .try_pull_sample(gstreamer::ClockTime::from_mseconds(timeout.as_millis() as u64))
            .ok_or_else(|| SourceError::disconnected(&self.url, "stream stalled"))?;
        let (pixels, width, height) = sample_to_pixels(&sample)
            .map_err(|message| SourceError::disconnected(&self.url, message))?;
        self.dimensions = Some((width, height));
        Ok(Frame::new(pixels, width, height)?)
    }
}

/// Copy a sample into a tightly packed RGB buffer, dropping row padding.
fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32), String> {
    let buffer = sample.buffer().ok_or("sample missing buffer")?;
    let caps = sample.caps().ok_or("sample missing caps")?;
    let info = gstreamer_video::VideoInfo::from_caps(caps)
        .map_err(|err| format!("parse caps as video info: {err}"))?;

    let width = info.width();
    let height = info.height();
    let row_bytes = width as usize * BYTES_PER_PIXEL;
    let stride = usize::try_from(info.stride()[0]).map_err(|_| "negative stride")?;

    let map = buffer
        .map_readable()
        .map_err(|err| format!("map buffer: {err}"))?;
    let data = map.as_slice();

    if stride == row_bytes {
        let len = row_bytes * height as usize;
        return data
            .get(..len)
            .map(|pixels| (pixels.to_vec(), width, height))
            .ok_or_else(|| "buffer shorter than frame".to_string());
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(
            data.get(start..start + row_bytes)
                .ok_or("buffer row is out of bounds")?,
        );
    }
    Ok((pixels, width, height))
}
