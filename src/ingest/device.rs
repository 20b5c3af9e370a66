use crate::error::SourceError;
use crate::frame::Frame;

use super::synthetic::SyntheticDevice;

/// A capture device the `Source` loop drives.
///
/// Implementations are only touched from the source thread. `read` must
/// return a complete frame or an error; it must not hand out a buffer it
/// keeps writing to.
pub trait Device: Send {
    /// Human-readable identifier used in logs (usually the URL).
    fn describe(&self) -> String;

    fn open(&mut self) -> Result<(), SourceError>;

    /// Drop the device handle. Must be safe to call when already closed.
    fn release(&mut self);

    fn is_open(&self) -> bool;

    /// Frame geometry, if the device knows it yet.
    fn dimensions(&self) -> Option<(u32, u32)>;

    /// Block until the next frame is available.
    fn read(&mut self) -> Result<Frame, SourceError>;
}

/// Geometry hints for devices that cannot report their own (synthetic).
#[derive(Clone, Debug)]
pub struct DeviceSettings {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            url: "stub://front_door".to_string(),
            width: 640,
            height: 480,
            fps: 15.0,
        }
    }
}

/// Pick a device implementation for `settings.url`.
pub fn open_device(settings: &DeviceSettings) -> Result<Box<dyn Device>, SourceError> {
    if settings.url.trim().is_empty() {
        return Err(SourceError::Unsupported {
            url: settings.url.clone(),
            message: "source url is empty".to_string(),
        });
    }
    if settings.url.starts_with("stub://") {
        return Ok(Box::new(SyntheticDevice::new(settings.clone())));
    }
    #[cfg(feature = "rtsp-gstreamer")]
    {
        Ok(Box::new(super::gstreamer::GstreamerDevice::new(settings)))
    }
    #[cfg(not(feature = "rtsp-gstreamer"))]
    {
        Err(SourceError::Unsupported {
            url: settings.url.clone(),
            message: "camera streams require the rtsp-gstreamer feature".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_urls_use_synthetic_device() {
        let settings = DeviceSettings {
            url: "stub://porch".to_string(),
            ..DeviceSettings::default()
        };
        let device = open_device(&settings).unwrap();
        assert_eq!(device.describe(), "stub://porch");
        assert!(!device.is_open());
    }

    #[test]
    fn empty_url_is_rejected() {
        let settings = DeviceSettings {
            url: "  ".to_string(),
            ..DeviceSettings::default()
        };
        assert!(matches!(
            open_device(&settings),
            Err(SourceError::Unsupported { .. })
        ));
    }

    #[cfg(not(feature = "rtsp-gstreamer"))]
    #[test]
    fn network_urls_need_gstreamer() {
        let settings = DeviceSettings {
            url: "rtsp://192.168.1.10/stream".to_string(),
            ..DeviceSettings::default()
        };
        assert!(open_device(&settings).is_err());
    }
}
