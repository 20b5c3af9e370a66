//! Turning detection results into bounded artifacts.
//!
//! A `CaptureSession` is owned by the dispatcher and fed one
//! `(DetectionKind, Frame)` pair per processed frame. Finished artifacts are
//! returned as values for the dispatcher to hand to an `ArchiveWriter`.

mod artifact;
mod session;

pub use artifact::{is_valid_timestamp_format, Artifact, ArtifactFormat, DEFAULT_TIMESTAMP_FORMAT};
pub use session::{CapturePolicy, CaptureSession, SessionSettings, SessionState};
