use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::archive::{ArchiveSettings, Destination, DEFAULT_JPEG_QUALITY, DEFAULT_UPLOAD_TIMEOUT};
use crate::capture::{
    is_valid_timestamp_format, CapturePolicy, SessionSettings, DEFAULT_TIMESTAMP_FORMAT,
};
use crate::detect::{DetectorRegistry, DetectorSettings};
use crate::dispatch::DispatchSettings;
use crate::ingest::{DeviceSettings, SourceSettings};
use crate::metrics::DEFAULT_REPORT_FRAMES;
use crate::notify::MqttSettings;
use crate::observe::{FramebufferSettings, ReserverSettings};

const DEFAULT_SOURCE_NAME: &str = "front_door";
const DEFAULT_SOURCE_URL: &str = "stub://front_door";
const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;
const DEFAULT_FPS: f64 = 15.0;
const DEFAULT_MAX_FAILURES: u32 = 0;
const DEFAULT_DETECTOR: &str = "motion";
const DEFAULT_CAPTURE_NAME: &str = "video";
const DEFAULT_CAPTURE_DIR: &str = "captures";
const DEFAULT_BACKUP_DIR: &str = "captures/backup";
const DEFAULT_GRACE_FRAMES: u32 = 15;
const DEFAULT_MAX_FRAMES: usize = 300;

#[derive(Debug, Deserialize, Default)]
struct DoorbotConfigFile {
    source: Option<SourceConfigFile>,
    dispatch: Option<DispatchConfigFile>,
    detector: Option<DetectorConfigFile>,
    capture: Option<Vec<CaptureConfigFile>>,
    mqtt: Option<MqttSettings>,
    reserver: Option<ReserverSettings>,
    framebuffer: Option<FramebufferSettings>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    name: Option<String>,
    url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<f64>,
    max_failures: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DispatchConfigFile {
    fps: Option<f64>,
    report_frames: Option<usize>,
    highlight_motion: Option<bool>,
    snapshot_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    #[serde(flatten)]
    settings: DetectorSettings,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    name: Option<String>,
    kind: Option<CapturePolicy>,
    grace_frames: Option<u32>,
    max_frames: Option<usize>,
    destination: Option<String>,
    backup_dir: Option<PathBuf>,
    jpeg_quality: Option<u8>,
    http_token: Option<String>,
    timestamp_format: Option<String>,
    upload_timeout_secs: Option<u64>,
}

/// Fully resolved daemon configuration.
#[derive(Debug, Clone)]
pub struct DoorbotConfig {
    pub source: SourceSettings,
    pub device: DeviceSettings,
    pub dispatch: DispatchSettings,
    pub detector: String,
    pub detector_settings: DetectorSettings,
    pub captures: Vec<CaptureConfig>,
    pub mqtt: Option<MqttSettings>,
    pub reserver: Option<ReserverSettings>,
    pub framebuffer: Option<FramebufferSettings>,
}

/// One `[[capture]]` channel.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub name: String,
    pub session: SessionSettings,
    pub archive: ArchiveSettings,
}

impl DoorbotConfig {
    /// Read `DOORBOT_CONFIG` (when set), apply environment overrides, validate.
    pub fn load() -> Result<Self> {
        let path = std::env::var("DOORBOT_CONFIG").ok().map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    /// Like `load`, with an explicit file taking the place of `DOORBOT_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => DoorbotConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a TOML document without touching the environment.
    pub fn from_toml(raw: &str) -> Result<Self> {
        let file: DoorbotConfigFile = toml::from_str(raw).context("invalid config")?;
        let cfg = Self::from_file(file);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: DoorbotConfigFile) -> Self {
        let source_file = file.source.unwrap_or_default();
        let fps = source_file.fps.unwrap_or(DEFAULT_FPS);
        let source = SourceSettings {
            name: source_file
                .name
                .unwrap_or_else(|| DEFAULT_SOURCE_NAME.to_string()),
            fps,
            max_failures: source_file.max_failures.unwrap_or(DEFAULT_MAX_FAILURES),
            report_frames: DEFAULT_REPORT_FRAMES,
        };
        let device = DeviceSettings {
            url: source_file
                .url
                .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
            width: source_file.width.unwrap_or(DEFAULT_SOURCE_WIDTH),
            height: source_file.height.unwrap_or(DEFAULT_SOURCE_HEIGHT),
            fps,
        };

        let dispatch_file = file.dispatch.unwrap_or_default();
        let defaults = DispatchSettings::default();
        let dispatch = DispatchSettings {
            // The detector cannot usefully run faster than frames arrive.
            fps: dispatch_file.fps.unwrap_or(fps),
            report_frames: dispatch_file.report_frames.unwrap_or(defaults.report_frames),
            highlight_motion: dispatch_file
                .highlight_motion
                .unwrap_or(defaults.highlight_motion),
            snapshot_quality: dispatch_file
                .snapshot_quality
                .unwrap_or(defaults.snapshot_quality),
        };

        let detector_file = file.detector.unwrap_or_default();
        let detector = detector_file
            .backend
            .unwrap_or_else(|| DEFAULT_DETECTOR.to_string());

        let captures = file
            .capture
            .unwrap_or_else(|| vec![CaptureConfigFile::default()])
            .into_iter()
            .map(capture_from_file)
            .collect();

        Self {
            source,
            device,
            dispatch,
            detector,
            detector_settings: detector_file.settings,
            captures,
            mqtt: file.mqtt,
            reserver: file.reserver,
            framebuffer: file.framebuffer,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("DOORBOT_SOURCE_URL") {
            if !url.trim().is_empty() {
                self.device.url = url;
            }
        }
        if let Ok(detector) = std::env::var("DOORBOT_DETECTOR") {
            if !detector.trim().is_empty() {
                self.detector = detector.trim().to_string();
            }
        }
        if let Ok(max_failures) = std::env::var("DOORBOT_MAX_FAILURES") {
            self.source.max_failures = max_failures
                .trim()
                .parse()
                .map_err(|_| anyhow!("DOORBOT_MAX_FAILURES must be a non-negative integer"))?;
        }
        if let Ok(host) = std::env::var("DOORBOT_MQTT_HOST") {
            if !host.trim().is_empty() {
                self.mqtt.get_or_insert_with(MqttSettings::default).host = host;
            }
        }
        if let Ok(listen) = std::env::var("DOORBOT_RESERVER_LISTEN") {
            if !listen.trim().is_empty() {
                self.reserver
                    .get_or_insert_with(ReserverSettings::default)
                    .listen = listen;
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.device.url.trim().is_empty() {
            return Err(anyhow!("source url must not be empty"));
        }
        if !positive(self.source.fps) {
            return Err(anyhow!("source fps must be greater than zero"));
        }
        if !positive(self.dispatch.fps) {
            return Err(anyhow!("dispatch fps must be greater than zero"));
        }
        let registry = DetectorRegistry::with_builtin();
        if !registry.contains(&self.detector) {
            return Err(anyhow!(
                "unknown detector '{}' (available: {})",
                self.detector,
                registry.list().join(", ")
            ));
        }
        if self.captures.is_empty() {
            return Err(anyhow!("at least one capture channel is required"));
        }
        let mut seen = BTreeSet::new();
        for capture in &self.captures {
            if capture.name.trim().is_empty() {
                return Err(anyhow!("capture name must not be empty"));
            }
            if !seen.insert(capture.name.as_str()) {
                return Err(anyhow!("duplicate capture name '{}'", capture.name));
            }
            if capture.session.max_frames == 0 {
                return Err(anyhow!(
                    "capture '{}': max_frames must be greater than zero",
                    capture.name
                ));
            }
            if !is_valid_timestamp_format(&capture.session.timestamp_format) {
                return Err(anyhow!(
                    "capture '{}': invalid timestamp_format '{}'",
                    capture.name,
                    capture.session.timestamp_format
                ));
            }
            if capture.archive.upload_timeout.is_zero() {
                return Err(anyhow!(
                    "capture '{}': upload_timeout_secs must be greater than zero",
                    capture.name
                ));
            }
            Destination::parse(&capture.archive.destination)
                .with_context(|| format!("capture '{}'", capture.name))?;
        }
        if let Some(reserver) = &self.reserver {
            if !positive(reserver.fps) {
                return Err(anyhow!("reserver fps must be greater than zero"));
            }
            if reserver.max_clients == 0 {
                return Err(anyhow!("reserver max_clients must be greater than zero"));
            }
        }
        if let Some(framebuffer) = &self.framebuffer {
            if !positive(framebuffer.fps) {
                return Err(anyhow!("framebuffer fps must be greater than zero"));
            }
        }
        Ok(())
    }
}

fn positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

fn capture_from_file(file: CaptureConfigFile) -> CaptureConfig {
    let policy = file.kind.unwrap_or_default();
    let name = file.name.unwrap_or_else(|| match policy {
        CapturePolicy::Video => DEFAULT_CAPTURE_NAME.to_string(),
        CapturePolicy::Photo => "photo".to_string(),
    });
    let session = SessionSettings {
        policy,
        grace_frames: file.grace_frames.unwrap_or(DEFAULT_GRACE_FRAMES),
        max_frames: file.max_frames.unwrap_or(DEFAULT_MAX_FRAMES),
        timestamp_format: file
            .timestamp_format
            .unwrap_or_else(|| DEFAULT_TIMESTAMP_FORMAT.to_string()),
    };
    let archive = ArchiveSettings {
        destination: file
            .destination
            .unwrap_or_else(|| format!("{DEFAULT_CAPTURE_DIR}/{name}")),
        backup_dir: file
            .backup_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BACKUP_DIR).join(&name)),
        format: policy.format(),
        jpeg_quality: file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
        http_token: file.http_token,
        upload_timeout: file
            .upload_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_UPLOAD_TIMEOUT),
    };
    CaptureConfig {
        name,
        session,
        archive,
    }
}

fn read_config_file(path: &Path) -> Result<DoorbotConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let cfg = DoorbotConfig::from_toml("").unwrap();
        assert_eq!(cfg.device.url, DEFAULT_SOURCE_URL);
        assert_eq!(cfg.detector, DEFAULT_DETECTOR);
        assert_eq!(cfg.dispatch.fps, DEFAULT_FPS);
        assert_eq!(cfg.captures.len(), 1);
        assert_eq!(cfg.captures[0].name, "video");
        assert_eq!(cfg.captures[0].archive.destination, "captures/video");
        assert!(cfg.mqtt.is_none());
        assert!(cfg.reserver.is_none());
    }

    #[test]
    fn photo_channel_uses_jpeg_format() {
        let cfg = DoorbotConfig::from_toml(
            r#"
            [[capture]]
            kind = "photo"
            destination = "/srv/stills"
            "#,
        )
        .unwrap();
        let capture = &cfg.captures[0];
        assert_eq!(capture.name, "photo");
        assert_eq!(capture.session.policy, CapturePolicy::Photo);
        assert_eq!(capture.archive.format, crate::capture::ArtifactFormat::Photo);
    }

    #[test]
    fn detector_tuning_is_flattened() {
        let cfg = DoorbotConfig::from_toml(
            r#"
            [detector]
            backend = "motion"
            cell_size = 8
            ignore_edges = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.detector_settings.cell_size, 8);
        assert!(cfg.detector_settings.ignore_edges);
        assert_eq!(cfg.detector_settings.history, DetectorSettings::default().history);
    }

    #[test]
    fn rejects_invalid_documents() {
        let cases = [
            "[source]\nfps = 0.0",
            "[dispatch]\nfps = -1.0",
            "[detector]\nbackend = \"yolo\"",
            "[[capture]]\nname = \"\"",
            "[[capture]]\nname = \"a\"\n[[capture]]\nname = \"a\"",
            "[[capture]]\nmax_frames = 0",
            "[[capture]]\ndestination = \"gopher://host/dir\"",
            "[[capture]]\ntimestamp_format = \"%Y-%Q\"",
            "[[capture]]\ntimestamp_format = \"\"",
            "[[capture]]\nupload_timeout_secs = 0",
            "[reserver]\nmax_clients = 0",
        ];
        for case in cases {
            assert!(DoorbotConfig::from_toml(case).is_err(), "accepted: {case}");
        }
    }
}
