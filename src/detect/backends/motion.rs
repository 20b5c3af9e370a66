//! Background-difference motion detector.
//!
//! The frame is reduced to a coarse grid of mean-luma cells. Each cell keeps a
//! running background average; a cell whose luma strays more than
//! `threshold` from its background counts as changed. The bounding box of all
//! changed cells is the movement region, which is then filtered by size and,
//! optionally, by whether it touches the frame border.

use crate::detect::detector::{DetectionEvent, DetectionKind, Detector, DetectorSettings};
use crate::error::DetectorError;
use crate::frame::{Frame, Rect, BYTES_PER_PIXEL};

pub struct MotionDetector {
    settings: DetectorSettings,
    background: Vec<f32>,
    grid: (u32, u32),
    frame_size: (u32, u32),
}

impl MotionDetector {
    pub fn new(mut settings: DetectorSettings) -> Self {
        settings.cell_size = settings.cell_size.max(1);
        settings.history = settings.history.max(1);
        log::debug!(
            "motion detector: minimum movement size {}x{}, ignore edges: {}, threshold: {}",
            settings.min_w,
            settings.min_h,
            settings.ignore_edges,
            settings.threshold
        );
        Self {
            settings,
            background: Vec::new(),
            grid: (0, 0),
            frame_size: (0, 0),
        }
    }

    fn seed(&mut self, frame: &Frame, cells: Vec<f32>) {
        self.frame_size = frame.dimensions();
        self.grid = grid_size(self.frame_size, self.settings.cell_size);
        self.background = cells;
    }

    /// Mean luma of each grid cell, row-major.
    fn cell_luma(&self, frame: &Frame) -> Vec<f32> {
        let cell = self.settings.cell_size as usize;
        let (width, height) = (frame.width() as usize, frame.height() as usize);
        let (cols, rows) = grid_size(frame.dimensions(), self.settings.cell_size);
        let (cols, rows) = (cols as usize, rows as usize);
        let mut sums = vec![0u64; cols * rows];
        let mut counts = vec![0u32; cols * rows];

        for (y, row) in frame
            .pixels()
            .chunks_exact(width * BYTES_PER_PIXEL)
            .take(height)
            .enumerate()
        {
            let base = (y / cell) * cols;
            for (x, px) in row.chunks_exact(BYTES_PER_PIXEL).enumerate() {
                let luma = (299 * px[0] as u64 + 587 * px[1] as u64 + 114 * px[2] as u64) / 1000;
                let index = base + x / cell;
                sums[index] += luma;
                counts[index] += 1;
            }
        }
        sums.iter()
            .zip(counts.iter())
            .map(|(sum, count)| *sum as f32 / (*count).max(1) as f32)
            .collect()
    }

    /// Bounding box of changed cells, in pixels; `None` below `min_cells`.
    fn changed_region(&self, cells: &[f32]) -> Option<Rect> {
        let cols = self.grid.0 as usize;
        let threshold = self.settings.threshold as f32;
        let mut changed = 0usize;
        let (mut min_cx, mut min_cy) = (usize::MAX, usize::MAX);
        let (mut max_cx, mut max_cy) = (0usize, 0usize);

        for (index, (current, background)) in cells.iter().zip(&self.background).enumerate() {
            if (current - background).abs() <= threshold {
                continue;
            }
            changed += 1;
            let (cx, cy) = (index % cols, index / cols);
            min_cx = min_cx.min(cx);
            min_cy = min_cy.min(cy);
            max_cx = max_cx.max(cx);
            max_cy = max_cy.max(cy);
        }
        if changed == 0 || changed < self.settings.min_cells {
            return None;
        }

        let cell = self.settings.cell_size;
        let (width, height) = self.frame_size;
        let x = min_cx as u32 * cell;
        let y = min_cy as u32 * cell;
        let right = ((max_cx as u32 + 1) * cell).min(width);
        let bottom = ((max_cy as u32 + 1) * cell).min(height);
        Some(Rect::new(x, y, right - x, bottom - y))
    }

    fn learn(&mut self, cells: &[f32]) {
        let alpha = 1.0 / self.settings.history as f32;
        for (background, current) in self.background.iter_mut().zip(cells) {
            *background += (current - *background) * alpha;
        }
    }

    fn classify(&self, region: Rect) -> DetectionKind {
        let (width, height) = self.frame_size;
        if region.w < self.settings.min_w || region.h < self.settings.min_h {
            log::debug!(
                "motion detector: small {}x{} at {}, {}",
                region.w,
                region.h,
                region.x,
                region.y
            );
            DetectionKind::Ignored
        } else if self.settings.ignore_edges && region.touches_edge(width, height) {
            log::debug!(
                "motion detector: edge {}x{} at {}, {}",
                region.w,
                region.h,
                region.x,
                region.y
            );
            DetectionKind::Ignored
        } else {
            DetectionKind::Movement
        }
    }
}

fn grid_size((width, height): (u32, u32), cell: u32) -> (u32, u32) {
    (width.div_ceil(cell), height.div_ceil(cell))
}

impl Detector for MotionDetector {
    fn name(&self) -> &'static str {
        "motion"
    }

    fn detect(&mut self, frame: &Frame) -> Result<DetectionEvent, DetectorError> {
        let cells = self.cell_luma(frame);

        if self.background.is_empty() {
            self.seed(frame, cells);
            return Ok(DetectionEvent::ignored(frame.clone()));
        }
        if frame.dimensions() != self.frame_size {
            let (width, height) = frame.dimensions();
            let expected = self.frame_size;
            // Start over at the new geometry; the next frame is compared against this one.
            self.seed(frame, cells);
            return Err(DetectorError::Frame {
                detector: "motion",
                width,
                height,
                message: format!(
                    "geometry changed from {}x{}; background reset",
                    expected.0, expected.1
                ),
            });
        }

        let region = self.changed_region(&cells);
        self.learn(&cells);

        Ok(match region {
            Some(region) => DetectionEvent::new(self.classify(region), frame.clone(), region),
            None => DetectionEvent::ignored(frame.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> DetectorSettings {
        DetectorSettings {
            cell_size: 4,
            history: 10,
            threshold: 20,
            ..DetectorSettings::default()
        }
    }

    fn scene(block: Option<Rect>) -> Frame {
        let (width, height) = (32u32, 32u32);
        let mut pixels = vec![80u8; (width * height) as usize * BYTES_PER_PIXEL];
        if let Some(block) = block {
            for y in block.y..block.bottom() {
                for x in block.x..block.right() {
                    let offset = ((y * width + x) as usize) * BYTES_PER_PIXEL;
                    pixels[offset..offset + 3].copy_from_slice(&[250, 250, 250]);
                }
            }
        }
        Frame::new(pixels, width, height).unwrap()
    }

    #[test]
    fn first_frame_seeds_background() {
        let mut detector = MotionDetector::new(settings());
        let event = detector.detect(&scene(Some(Rect::new(12, 12, 8, 8)))).unwrap();
        assert_eq!(event.kind, DetectionKind::Ignored);
    }

    #[test]
    fn block_is_reported_with_its_bounds() {
        let mut detector = MotionDetector::new(settings());
        detector.detect(&scene(None)).unwrap();
        assert!(!detector.detect(&scene(None)).unwrap().is_movement());

        let event = detector.detect(&scene(Some(Rect::new(12, 12, 8, 8)))).unwrap();
        assert!(event.is_movement());
        assert_eq!(event.position, (12, 12));
        assert_eq!(event.dimensions, (8, 8));
    }

    #[test]
    fn small_regions_are_ignored() {
        let mut detector = MotionDetector::new(DetectorSettings {
            min_w: 10,
            ..settings()
        });
        detector.detect(&scene(None)).unwrap();
        let event = detector.detect(&scene(Some(Rect::new(12, 12, 8, 8)))).unwrap();
        assert_eq!(event.kind, DetectionKind::Ignored);
        assert_eq!(event.dimensions, (8, 8));
    }

    #[test]
    fn edge_regions_are_ignored_when_asked() {
        let block = Some(Rect::new(0, 8, 8, 8));

        let mut detector = MotionDetector::new(settings());
        detector.detect(&scene(None)).unwrap();
        assert!(detector.detect(&scene(block)).unwrap().is_movement());

        let mut detector = MotionDetector::new(DetectorSettings {
            ignore_edges: true,
            ..settings()
        });
        detector.detect(&scene(None)).unwrap();
        assert!(!detector.detect(&scene(block)).unwrap().is_movement());
    }

    #[test]
    fn background_absorbs_a_static_change() {
        let mut detector = MotionDetector::new(DetectorSettings {
            history: 1,
            ..settings()
        });
        let block = Some(Rect::new(12, 12, 8, 8));
        detector.detect(&scene(None)).unwrap();
        assert!(detector.detect(&scene(block)).unwrap().is_movement());
        assert!(!detector.detect(&scene(block)).unwrap().is_movement());
    }

    #[test]
    fn geometry_change_is_a_detector_error() {
        let mut detector = MotionDetector::new(settings());
        detector.detect(&scene(None)).unwrap();
        let other = Frame::filled(16, 16, [80, 80, 80]).unwrap();
        assert!(matches!(
            detector.detect(&other),
            Err(DetectorError::Frame { detector: "motion", .. })
        ));
        assert!(!detector.detect(&other).unwrap().is_movement());
    }
}
