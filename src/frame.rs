//! Frame container shared by every stage of the pipeline.
//!
//! - `Frame`: immutable packed RGB8 image with capture time and sequence number.
//! - `Rect`: pixel rectangle used for detections and overlays.
//!
//! A `Frame` is never mutated after construction. Cloning shares the pixel
//! buffer, so handing a frame to several consumers costs a reference count,
//! and a consumer that keeps an old frame is unaffected by newer publishes.
//! Anything that wants different pixels (overlays, scaling) builds a new frame.

use chrono::{DateTime, Local};
use std::fmt;
use std::sync::Arc;

use crate::error::FrameError;

/// Bytes per pixel of the packed RGB8 layout used throughout the crate.
pub const BYTES_PER_PIXEL: usize = 3;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

#[derive(Clone)]
pub struct Frame {
    pixels: Arc<[u8]>,
    width: u32,
    height: u32,
    captured_at: DateTime<Local>,
    sequence: u64,
}

impl Frame {
    /// Wrap a packed RGB8 buffer captured now.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self, FrameError> {
        Self::captured_at(pixels, width, height, Local::now())
    }

    /// Wrap a packed RGB8 buffer with an explicit capture time.
    pub fn captured_at(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        captured_at: DateTime<Local>,
    ) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::EmptyDimensions { width, height });
        }
        let expected = width as usize * height as usize * BYTES_PER_PIXEL;
        if pixels.len() != expected {
            return Err(FrameError::BufferSize {
                width,
                height,
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            pixels: pixels.into(),
            width,
            height,
            captured_at,
            sequence: 0,
        })
    }

    /// Solid-colour frame, mostly useful for tests and placeholders.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Result<Self, FrameError> {
        let count = width as usize * height as usize;
        let mut pixels = Vec::with_capacity(count * BYTES_PER_PIXEL);
        for _ in 0..count {
            pixels.extend_from_slice(&rgb);
        }
        Self::new(pixels, width, height)
    }

    /// Same pixels and capture time, stamped with the producer's sequence number.
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Copy of this frame with a different pixel buffer of the same geometry.
    pub(crate) fn with_pixels(&self, pixels: Vec<u8>) -> Result<Self, FrameError> {
        let mut frame = Self::captured_at(pixels, self.width, self.height, self.captured_at)?;
        frame.sequence = self.sequence;
        Ok(frame)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn captured_at_time(&self) -> DateTime<Local> {
        self.captured_at
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// RGB value at `(x, y)`. Out-of-range coordinates return `None`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        Some([
            self.pixels[offset],
            self.pixels[offset + 1],
            self.pixels[offset + 2],
        ])
    }

    /// True when both frames share one pixel buffer.
    pub fn shares_buffer_with(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
    }
}

// Pixel data is deliberately left out of Debug output.
impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("captured_at", &self.captured_at)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Rect
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.w)
    }

    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.h)
    }

    /// True when the rectangle is degenerate or reaches the border of a
    /// `width` x `height` image.
    pub fn touches_edge(&self, width: u32, height: u32) -> bool {
        self.w == 0
            || self.h == 0
            || self.x == 0
            || self.y == 0
            || self.right() >= width
            || self.bottom() >= height
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_buffer_of_wrong_size() {
        let err = Frame::new(vec![0u8; 10], 4, 4).unwrap_err();
        assert!(matches!(
            err,
            FrameError::BufferSize {
                expected: 48,
                actual: 10,
                ..
            }
        ));
    }

    #[test]
    fn rejects_zero_dimensions() {
        assert!(Frame::new(Vec::new(), 0, 10).is_err());
    }

    #[test]
    fn clones_share_pixels() {
        let frame = Frame::filled(8, 8, [1, 2, 3]).unwrap();
        let copy = frame.clone();
        assert!(frame.shares_buffer_with(&copy));
        assert_eq!(copy.pixel(7, 7), Some([1, 2, 3]));
        assert_eq!(copy.pixel(8, 0), None);
    }

    #[test]
    fn with_pixels_keeps_metadata() {
        let frame = Frame::filled(2, 2, [0, 0, 0]).unwrap().with_sequence(9);
        let painted = frame.with_pixels(vec![255u8; 12]).unwrap();
        assert_eq!(painted.sequence(), 9);
        assert_eq!(painted.captured_at_time(), frame.captured_at_time());
        assert!(!painted.shares_buffer_with(&frame));
        assert_eq!(frame.pixel(0, 0), Some([0, 0, 0]));
    }

    #[test]
    fn edge_detection_for_rects() {
        assert!(Rect::new(0, 5, 10, 10).touches_edge(100, 100));
        assert!(Rect::new(5, 5, 95, 10).touches_edge(100, 100));
        assert!(Rect::new(5, 5, 0, 10).touches_edge(100, 100));
        assert!(!Rect::new(5, 5, 10, 10).touches_edge(100, 100));
    }
}
