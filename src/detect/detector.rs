use serde::Deserialize;

use crate::error::DetectorError;
use crate::frame::{Frame, Rect};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectionKind {
    Ignored,
    Movement,
}

impl DetectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ignored => "ignored",
            Self::Movement => "movement",
        }
    }
}

/// What a detector concluded about one frame.
#[derive(Clone, Debug)]
pub struct DetectionEvent {
    pub kind: DetectionKind,
    /// Size of the active region (w, h).
    pub dimensions: (u32, u32),
    /// Top-left corner of the active region (x, y).
    pub position: (u32, u32),
    pub frame: Frame,
}

impl DetectionEvent {
    pub fn new(kind: DetectionKind, frame: Frame, region: Rect) -> Self {
        Self {
            kind,
            dimensions: (region.w, region.h),
            position: (region.x, region.y),
            frame,
        }
    }

    /// Nothing of interest anywhere in the frame.
    pub fn ignored(frame: Frame) -> Self {
        Self::new(DetectionKind::Ignored, frame, Rect::default())
    }

    pub fn movement(frame: Frame, region: Rect) -> Self {
        Self::new(DetectionKind::Movement, frame, region)
    }

    pub fn is_movement(&self) -> bool {
        self.kind == DetectionKind::Movement
    }

    pub fn region(&self) -> Rect {
        Rect::new(
            self.position.0,
            self.position.1,
            self.dimensions.0,
            self.dimensions.1,
        )
    }
}

/// A pluggable activity detector.
///
/// Implementations may keep state between calls (background models, digests)
/// but must not hold on to the frame itself beyond what the returned event
/// carries.
pub trait Detector: Send {
    fn name(&self) -> &'static str;

    fn detect(&mut self, frame: &Frame) -> Result<DetectionEvent, DetectorError>;
}

/// Tuning knobs shared by the built-in detectors. Each backend reads the
/// fields it understands.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    /// Side of one square analysis cell, in pixels.
    pub cell_size: u32,
    /// Frames it takes the background model to absorb a change.
    pub history: u32,
    /// Mean luma difference that marks a cell as changed.
    pub threshold: u8,
    /// Changed cells needed before a region is reported at all.
    pub min_cells: usize,
    pub min_w: u32,
    pub min_h: u32,
    /// Treat regions touching the frame border as noise.
    pub ignore_edges: bool,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            cell_size: 16,
            history: 150,
            threshold: 25,
            min_cells: 1,
            min_w: 0,
            min_h: 0,
            ignore_edges: false,
        }
    }
}
