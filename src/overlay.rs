//! Drawing on observer copies of frames.

use crate::error::FrameError;
use crate::frame::{Frame, Rect, BYTES_PER_PIXEL};

pub const MOTION_COLOR: [u8; 3] = [255, 0, 0];
pub const MOTION_THICKNESS: u32 = 3;

/// Copy of `frame` with `rect` outlined. The rectangle is clipped to the
/// frame; an empty rectangle returns the frame unchanged (shared buffer).
pub fn outline(frame: &Frame, rect: Rect, color: [u8; 3], thickness: u32) -> Result<Frame, FrameError> {
    let (width, height) = frame.dimensions();
    if rect.w == 0 || rect.h == 0 || rect.x >= width || rect.y >= height || thickness == 0 {
        return Ok(frame.clone());
    }
    let right = rect.right().min(width);
    let bottom = rect.bottom().min(height);
    let mut pixels = frame.pixels().to_vec();

    for y in rect.y..bottom {
        for x in rect.x..right {
            let on_border = x < rect.x + thickness
                || x + thickness >= right
                || y < rect.y + thickness
                || y + thickness >= bottom;
            if on_border {
                let offset = (y as usize * width as usize + x as usize) * BYTES_PER_PIXEL;
                pixels[offset..offset + BYTES_PER_PIXEL].copy_from_slice(&color);
            }
        }
    }
    frame.with_pixels(pixels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn border_is_painted_interior_is_not() {
        let frame = Frame::filled(20, 20, [0, 0, 0]).unwrap().with_sequence(4);
        let boxed = outline(&frame, Rect::new(5, 5, 10, 10), MOTION_COLOR, 2).unwrap();
        assert_eq!(boxed.pixel(5, 5), Some(MOTION_COLOR));
        assert_eq!(boxed.pixel(6, 10), Some(MOTION_COLOR));
        assert_eq!(boxed.pixel(14, 14), Some(MOTION_COLOR));
        assert_eq!(boxed.pixel(10, 10), Some([0, 0, 0]));
        assert_eq!(boxed.pixel(4, 4), Some([0, 0, 0]));
        assert_eq!(boxed.sequence(), 4);
        // The source frame is untouched.
        assert_eq!(frame.pixel(5, 5), Some([0, 0, 0]));
    }

    #[test]
    fn rect_is_clipped_to_the_frame() {
        let frame = Frame::filled(8, 8, [0, 0, 0]).unwrap();
        let boxed = outline(&frame, Rect::new(4, 4, 100, 100), MOTION_COLOR, 1).unwrap();
        assert_eq!(boxed.pixel(7, 7), Some(MOTION_COLOR));
        assert_eq!(boxed.pixel(4, 6), Some(MOTION_COLOR));
        assert_eq!(boxed.pixel(5, 5), Some([0, 0, 0]));
    }

    #[test]
    fn empty_rect_shares_the_buffer() {
        let frame = Frame::filled(8, 8, [0, 0, 0]).unwrap();
        let same = outline(&frame, Rect::default(), MOTION_COLOR, 3).unwrap();
        assert!(same.shares_buffer_with(&frame));
    }
}
