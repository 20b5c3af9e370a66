use serde::Deserialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::ObserverHandle;
use crate::bus::{FrameBus, SlotEndpoint};
use crate::frame::{Frame, BYTES_PER_PIXEL};
use crate::metrics::LoopTimer;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct FramebufferSettings {
    pub path: PathBuf,
    /// Scale to this size; both must be set to take effect.
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: f64,
}

impl Default for FramebufferSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/dev/fb0"),
            width: None,
            height: None,
            fps: 10.0,
        }
    }
}

/// Mirrors the processed stream onto a Linux framebuffer device.
pub struct FramebufferObserver {
    settings: FramebufferSettings,
}

impl FramebufferObserver {
    pub fn new(settings: FramebufferSettings) -> Self {
        Self { settings }
    }

    fn target(&self) -> Option<(u32, u32)> {
        match (self.settings.width, self.settings.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
            _ => None,
        }
    }

    pub fn spawn(self, bus: &FrameBus) -> std::io::Result<ObserverHandle> {
        let endpoint = bus.subscribe();
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut handle = ObserverHandle::new("framebuffer", shutdown.clone());
        handle.threads.push(
            std::thread::Builder::new()
                .name("framebuffer".to_string())
                .spawn(move || self.run(endpoint, &shutdown))?,
        );
        Ok(handle)
    }

    fn run(&self, endpoint: SlotEndpoint, shutdown: &AtomicBool) {
        log::debug!("framebuffer: drawing to {}", self.settings.path.display());
        let mut timer = LoopTimer::new("framebuffer", self.settings.fps, 0);
        let mut failing = false;
        while !shutdown.load(Ordering::SeqCst) {
            timer.start();
            if endpoint.is_ready() && !endpoint.is_stale() {
                if let Some(frame) = endpoint.acquire() {
                    match self.draw(&frame) {
                        Ok(()) => failing = false,
                        // Log the first failure of a run, not every frame.
                        Err(err) if !failing => {
                            log::warn!(
                                "framebuffer: writing {} failed: {}",
                                self.settings.path.display(),
                                err
                            );
                            failing = true;
                        }
                        Err(_) => {}
                    }
                }
            }
            timer.end();
        }
    }

    /// Write one frame to the device from offset zero.
    pub fn draw(&self, frame: &Frame) -> std::io::Result<()> {
        let pixels = to_bgra(frame, self.target());
        let mut device = OpenOptions::new()
            .write(true)
            .create(false)
            .open(&self.settings.path)?;
        device.write_all(&pixels)
    }
}

/// Convert to BGRA, nearest-neighbour scaled to `target` when given.
pub fn to_bgra(frame: &Frame, target: Option<(u32, u32)>) -> Vec<u8> {
    let (src_w, src_h) = frame.dimensions();
    let (dst_w, dst_h) = target.unwrap_or((src_w, src_h));
    let src = frame.pixels();
    let mut out = Vec::with_capacity(dst_w as usize * dst_h as usize * 4);
    for y in 0..dst_h as usize {
        let sy = y * src_h as usize / dst_h as usize;
        for x in 0..dst_w as usize {
            let sx = x * src_w as usize / dst_w as usize;
            let offset = (sy * src_w as usize + sx) * BYTES_PER_PIXEL;
            let rgb = &src[offset..offset + BYTES_PER_PIXEL];
            out.extend_from_slice(&[rgb[2], rgb[1], rgb[0], 0xFF]);
        }
    }
    out
}
