//! Activity detection.
//!
//! Detectors are selected by name from configuration through a
//! `DetectorRegistry`; each one turns a frame into exactly one
//! `DetectionEvent`.

mod backends;
mod detector;
mod registry;

pub use backends::{MotionDetector, StubDetector};
pub use detector::{DetectionEvent, DetectionKind, Detector, DetectorSettings};
pub use registry::{DetectorFactory, DetectorRegistry};
