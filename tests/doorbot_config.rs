use std::sync::Mutex;

use tempfile::NamedTempFile;

use doorbot::config::DoorbotConfig;
use doorbot::{ArtifactFormat, CapturePolicy};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "DOORBOT_CONFIG",
        "DOORBOT_SOURCE_URL",
        "DOORBOT_DETECTOR",
        "DOORBOT_MAX_FAILURES",
        "DOORBOT_MQTT_HOST",
        "DOORBOT_RESERVER_LISTEN",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let toml = r#"
        [source]
        name = "porch"
        url = "rtsp://camera-1/stream"
        fps = 12.0
        max_failures = 30

        [dispatch]
        highlight_motion = false

        [detector]
        backend = "motion"
        cell_size = 8
        min_w = 24
        min_h = 24

        [[capture]]
        name = "clips"
        kind = "video"
        grace_frames = 10
        max_frames = 100
        destination = "ftp://cam:pw@nas.local/doorbot/%date%"
        backup_dir = "/var/lib/doorbot/backup"

        [[capture]]
        name = "stills"
        kind = "photo"
        destination = "/var/lib/doorbot/stills"

        [mqtt]
        topic = "porch"
        snapshots = true
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    std::env::set_var("DOORBOT_CONFIG", file.path());
    std::env::set_var("DOORBOT_DETECTOR", "stub");
    std::env::set_var("DOORBOT_MQTT_HOST", "broker.local");
    std::env::set_var("DOORBOT_RESERVER_LISTEN", "127.0.0.1:0");

    let cfg = DoorbotConfig::load().expect("load config");

    assert_eq!(cfg.source.name, "porch");
    assert_eq!(cfg.source.max_failures, 30);
    assert_eq!(cfg.device.url, "rtsp://camera-1/stream");
    assert_eq!(cfg.device.fps, 12.0);
    // Dispatch follows the source rate unless set.
    assert_eq!(cfg.dispatch.fps, 12.0);
    assert!(!cfg.dispatch.highlight_motion);
    assert_eq!(cfg.detector, "stub");
    assert_eq!(cfg.detector_settings.cell_size, 8);
    assert_eq!(cfg.detector_settings.min_w, 24);

    assert_eq!(cfg.captures.len(), 2);
    let clips = &cfg.captures[0];
    assert_eq!(clips.name, "clips");
    assert_eq!(clips.session.grace_frames, 10);
    assert_eq!(clips.session.max_frames, 100);
    assert_eq!(clips.archive.format, ArtifactFormat::Video);
    assert_eq!(
        clips.archive.backup_dir,
        std::path::PathBuf::from("/var/lib/doorbot/backup")
    );
    let stills = &cfg.captures[1];
    assert_eq!(stills.session.policy, CapturePolicy::Photo);
    assert_eq!(stills.archive.format, ArtifactFormat::Photo);

    let mqtt = cfg.mqtt.expect("mqtt section");
    assert_eq!(mqtt.host, "broker.local");
    assert_eq!(mqtt.topic, "porch");
    assert!(mqtt.snapshots);
    // The listen override enables the reserver with defaults otherwise.
    let reserver = cfg.reserver.expect("reserver enabled by env");
    assert_eq!(reserver.listen, "127.0.0.1:0");
    assert!(cfg.framebuffer.is_none());

    clear_env();
}

#[test]
fn defaults_apply_without_a_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    std::env::set_var("DOORBOT_SOURCE_URL", "stub://garage");

    let cfg = DoorbotConfig::load().expect("load config");
    assert_eq!(cfg.device.url, "stub://garage");
    assert_eq!(cfg.source.max_failures, 0);
    assert_eq!(cfg.captures.len(), 1);
    assert!(cfg.mqtt.is_none());

    clear_env();
}

#[test]
fn rejects_unknown_detector_from_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    std::env::set_var("DOORBOT_DETECTOR", "yolo");

    let err = DoorbotConfig::load().expect_err("unknown detector");
    assert!(err.to_string().contains("yolo"));

    clear_env();
}

#[test]
fn rejects_malformed_max_failures() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    std::env::set_var("DOORBOT_MAX_FAILURES", "many");

    assert!(DoorbotConfig::load().is_err());

    clear_env();
}

#[test]
fn rejects_duplicate_capture_names() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let toml = r#"
        [[capture]]
        name = "clips"

        [[capture]]
        name = "clips"
        kind = "photo"
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    let err = DoorbotConfig::load_from(Some(file.path())).expect_err("duplicate names");
    assert!(err.to_string().contains("duplicate"));
}

#[test]
fn rejects_unknown_timestamp_specifier() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let toml = r#"
        [[capture]]
        name = "clips"
        timestamp_format = "%Y-%m-%d-%Q"
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    let err = DoorbotConfig::load_from(Some(file.path())).expect_err("bad timestamp format");
    let message = err.to_string();
    assert!(message.contains("clips"), "{message}");
    assert!(message.contains("timestamp_format"), "{message}");
}
