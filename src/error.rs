//! Error taxonomy for the capture pipeline.
//!
//! Per-frame and per-artifact errors stay inside the component that owns them
//! and are logged there. Only [`SourceError::Exhausted`] and
//! [`ArchiveError::Backup`] are allowed to end the process; both reach the
//! daemon through [`DispatchError`].

use std::path::PathBuf;

/// A frame buffer that does not match its declared geometry.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame buffer holds {actual} bytes, expected {expected} for {width}x{height} RGB")]
    BufferSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("frame dimensions must be non-zero (got {width}x{height})")]
    EmptyDimensions { width: u32, height: u32 },
}

/// Capture device failures.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("device {device} could not be opened: {message}")]
    Open { device: String, message: String },

    #[error("device {device} disconnected: {message}")]
    Disconnected { device: String, message: String },

    #[error("device {device} failed {attempts} consecutive reads; giving up")]
    Exhausted { device: String, attempts: u32 },

    #[error("unsupported source url {url}: {message}")]
    Unsupported { url: String, message: String },

    #[error("source thread for {device} panicked")]
    Panicked { device: String },

    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl SourceError {
    pub fn disconnected(device: impl Into<String>, message: impl ToString) -> Self {
        Self::Disconnected {
            device: device.into(),
            message: message.to_string(),
        }
    }

    pub fn open(device: impl Into<String>, message: impl ToString) -> Self {
        Self::Open {
            device: device.into(),
            message: message.to_string(),
        }
    }
}

/// Detector failures. The dispatcher treats the offending frame as ignored.
#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("detector '{0}' is not registered")]
    UnknownBackend(String),

    #[error("detector {detector} rejected frame {width}x{height}: {message}")]
    Frame {
        detector: &'static str,
        width: u32,
        height: u32,
        message: String,
    },

    #[error("detector {detector} failed: {message}")]
    Backend {
        detector: &'static str,
        message: String,
    },
}

/// Failures turning frames into a file on disk.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("artifact contains no frames")]
    Empty,

    #[error("{format} artifacts hold exactly {expected} frame(s), got {actual}")]
    FrameCount {
        format: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error(
        "frame {index} is {actual_width}x{actual_height}, artifact is {expected_width}x{expected_height}"
    )]
    DimensionMismatch {
        index: usize,
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failures shipping a finished file to the remote store.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("unsupported upload scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("remote url {0} has no host")]
    MissingHost(String),

    #[error(transparent)]
    Ftp(#[from] suppaftp::FtpError),

    #[error("http upload failed: {0}")]
    Http(String),

    #[error("tls setup failed: {0}")]
    Tls(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Outcome of one archive worker that did not end with the artifact stored
/// where it was meant to go.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("invalid archive destination {destination}: {message}")]
    Destination {
        destination: String,
        message: String,
    },

    #[error("encoding {artifact} failed: {source}")]
    Encode {
        artifact: String,
        #[source]
        source: EncodeError,
    },

    #[error("uploading {artifact} to {remote} failed ({source}); kept at {backup}")]
    Upload {
        artifact: String,
        remote: String,
        backup: PathBuf,
        #[source]
        source: UploadError,
    },

    #[error("backing up {artifact} to {backup} failed: {source}")]
    Backup {
        artifact: String,
        backup: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("archive worker for {artifact} panicked")]
    WorkerPanicked { artifact: String },
}

impl ArchiveError {
    /// True when the artifact is lost and an operator has to step in.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Backup { .. })
    }
}

/// Errors that stop the dispatch loop.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}
