//! Frame acquisition.
//!
//! A `Source` owns one capture `Device`, runs its acquisition loop on a
//! dedicated thread and publishes every frame it reads to a `FrameBus`.
//! Devices:
//! - `stub://<name>` synthetic scene (tests, demos)
//! - any GStreamer URI, including `rtsp://` cameras and `v4l2://` or a bare
//!   device index for local cameras (feature: rtsp-gstreamer)
//!
//! Sources retry a lost device forever, except when a consecutive failure
//! bound is configured; crossing it ends the source with
//! `SourceError::Exhausted`, which the dispatcher treats as fatal.

mod device;
#[cfg(feature = "rtsp-gstreamer")]
mod gstreamer;
mod source;
mod synthetic;

pub use device::{open_device, Device, DeviceSettings};
#[cfg(feature = "rtsp-gstreamer")]
pub use gstreamer::GstreamerDevice;
pub use source::{Source, SourceHandle, SourceSettings, SourceState, SourceStep};
pub use synthetic::SyntheticDevice;
