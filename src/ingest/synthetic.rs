//! Synthetic (`stub://`) capture device.
//!
//! Renders a static gradient background with light sensor noise. Every
//! `SCENE_PERIOD` frames a block walks across the scene for
//! `SCENE_ACTIVE` frames, which is enough for the motion detector to fire.

use rand::Rng;

use super::device::{Device, DeviceSettings};
use crate::error::SourceError;
use crate::frame::{Frame, BYTES_PER_PIXEL};

const SCENE_PERIOD: u64 = 90;
const SCENE_ACTIVE: u64 = 30;
const NOISE: u8 = 2;

pub struct SyntheticDevice {
    settings: DeviceSettings,
    open: bool,
    frame_count: u64,
    background: Vec<u8>,
}

impl SyntheticDevice {
    pub fn new(settings: DeviceSettings) -> Self {
        let background = gradient(settings.width, settings.height);
        Self {
            settings,
            open: false,
            frame_count: 0,
            background,
        }
    }

    pub fn frames_generated(&self) -> u64 {
        self.frame_count
    }

    fn render(&mut self) -> Vec<u8> {
        let width = self.settings.width as usize;
        let height = self.settings.height as usize;
        let mut pixels = self.background.clone();

        let mut rng = rand::thread_rng();
        for pixel in pixels.iter_mut() {
            let jitter: i16 = rng.gen_range(-(NOISE as i16)..=NOISE as i16);
            *pixel = (*pixel as i16 + jitter).clamp(0, 255) as u8;
        }

        let phase = self.frame_count % SCENE_PERIOD;
        if phase < SCENE_ACTIVE {
            let block = (width.min(height) / 5).max(1);
            let travel = width.saturating_sub(block);
            let left = (travel as u64 * phase / SCENE_ACTIVE) as usize;
            let top = height.saturating_sub(block) / 2;
            for y in top..(top + block).min(height) {
                for x in left..(left + block).min(width) {
                    let offset = (y * width + x) * BYTES_PER_PIXEL;
                    pixels[offset..offset + BYTES_PER_PIXEL].copy_from_slice(&[230, 40, 40]);
                }
            }
        }
        pixels
    }
}

impl Device for SyntheticDevice {
    fn describe(&self) -> String {
        self.settings.url.clone()
    }

    /// Synthetic devices always connect.
    fn open(&mut self) -> Result<(), SourceError> {
        log::info!("synthetic device {} opened", self.settings.url);
        self.open = true;
        Ok(())
    }

    fn release(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        self.open
            .then_some((self.settings.width, self.settings.height))
    }

    fn read(&mut self) -> Result<Frame, SourceError> {
        if !self.open {
            return Err(SourceError::disconnected(
                self.settings.url.clone(),
                "device is not open",
            ));
        }
        self.frame_count += 1;
        let pixels = self.render();
        Ok(Frame::new(
            pixels,
            self.settings.width,
            self.settings.height,
        )?)
    }
}

fn gradient(width: u32, height: u32) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let mut pixels = Vec::with_capacity(w * h * BYTES_PER_PIXEL);
    for y in 0..h {
        for x in 0..w {
            let r = (x * 255 / w.max(1)) as u8;
            let g = (y * 255 / h.max(1)) as u8;
            pixels.extend_from_slice(&[r / 2 + 40, g / 2 + 40, 90]);
        }
    }
    pixels
}
