//! Doorbot
//!
//! Motion-triggered capture, archival and live view for IP and USB cameras.
//!
//! # Architecture
//!
//! Frames flow one way and nothing downstream can stall what is upstream:
//!
//! 1. **Acquisition**: a `Source` thread reads its `Device` and publishes
//!    every frame to a `FrameBus`, retrying the device on failure.
//! 2. **Hand-off**: each consumer owns a `FrameSlot` (latest frame wins) or a
//!    bounded queue that drops its oldest frame when full.
//! 3. **Dispatch**: the `Dispatcher` polls its slot, runs the `Detector`,
//!    notifies, and drives one `CaptureSession` per capture channel.
//! 4. **Archival**: finished artifacts go to an `ArchiveWriter` worker thread
//!    that encodes, uploads, and falls back to a local backup directory.
//!
//! # Module Structure
//!
//! - `frame`, `slot`, `bus`: immutable frames and their distribution
//! - `ingest`: devices and the acquisition loop
//! - `detect`: detector trait, registry and built-in backends
//! - `capture`: capture state machine and artifacts
//! - `archive`: encoding, upload and backup
//! - `notify`, `observe`: notification sinks and live viewers
//! - `dispatch`: the per-camera control loop
//! - `config`: daemon configuration

pub mod archive;
pub mod bus;
pub mod capture;
pub mod config;
pub mod detect;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod metrics;
pub mod notify;
pub mod observe;
pub mod overlay;
pub mod slot;

pub use archive::{ArchiveOutcome, ArchiveSettings, ArchiveWriter, Destination};
pub use bus::{FrameBus, QueueEndpoint, SlotEndpoint};
pub use capture::{Artifact, ArtifactFormat, CapturePolicy, CaptureSession, SessionSettings, SessionState};
pub use config::{CaptureConfig, DoorbotConfig};
pub use detect::{DetectionEvent, DetectionKind, Detector, DetectorRegistry, DetectorSettings};
pub use dispatch::{CaptureChannel, DispatchSettings, Dispatcher, TickOutcome};
pub use error::{
    ArchiveError, DetectorError, DispatchError, EncodeError, FrameError, SourceError, UploadError,
};
pub use frame::{Frame, Rect};
pub use ingest::{Device, Source, SourceHandle, SourceSettings, SourceState};
pub use metrics::{LoopTimer, PipelineMetrics};
pub use slot::FrameSlot;
