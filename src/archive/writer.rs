use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use super::destination::{expand_local, Destination};
use super::encoder::{encoder_for, Encoder, DEFAULT_JPEG_QUALITY};
use super::uploader::{uploader_for, Uploader, DEFAULT_UPLOAD_TIMEOUT};
use crate::capture::{Artifact, ArtifactFormat};
use crate::error::{ArchiveError, EncodeError};
use crate::metrics::PipelineMetrics;

#[derive(Clone, Debug)]
pub struct ArchiveSettings {
    /// Local directory or remote url.
    pub destination: String,
    /// Where remote artifacts land when upload fails.
    pub backup_dir: PathBuf,
    pub format: ArtifactFormat,
    pub jpeg_quality: u8,
    /// Bearer token for HTTP destinations.
    pub http_token: Option<String>,
    /// Socket read/write limit for remote uploads.
    pub upload_timeout: Duration,
}

impl ArchiveSettings {
    pub fn new(destination: impl Into<String>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
            backup_dir: backup_dir.into(),
            format: ArtifactFormat::Video,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            http_token: None,
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
        }
    }
}

/// Where an artifact ended up when all went to plan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArchiveOutcome {
    Stored { path: PathBuf },
    Uploaded { remote: String },
}

/// Everything a worker needs, cloned into each worker thread.
#[derive(Clone)]
struct Pipeline {
    channel: String,
    destination: Destination,
    backup_dir: PathBuf,
    encoder: Arc<dyn Encoder>,
    uploader: Option<Arc<dyn Uploader>>,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl Pipeline {
    fn run(&self, artifact: Artifact) -> Result<ArchiveOutcome, ArchiveError> {
        let result = self.process(&artifact);
        self.report(&artifact, &result);
        result
    }

    fn process(&self, artifact: &Artifact) -> Result<ArchiveOutcome, ArchiveError> {
        let name = artifact.file_name();
        match (&self.destination, &self.uploader) {
            (Destination::Remote(_), Some(uploader)) => {
                let scratch = tempfile::Builder::new()
                    .prefix("doorbot-")
                    .tempdir()
                    .map_err(|err| encode_failed(&name, err.into()))?;
                let path = scratch.path().join(&name);
                self.encode(artifact, &path)?;

                match uploader.upload(&path, artifact) {
                    Ok(remote) => Ok(ArchiveOutcome::Uploaded { remote }),
                    Err(source) => {
                        log::error!("archive {}: upload of {} failed: {}", self.channel, name, source);
                        let backup = self.backup_dir.join(&name);
                        log::info!(
                            "archive {}: moving {} to {}...",
                            self.channel,
                            path.display(),
                            backup.display()
                        );
                        move_file(&path, &backup).map_err(|err| ArchiveError::Backup {
                            artifact: name.clone(),
                            backup: backup.clone(),
                            source: err,
                        })?;
                        Err(ArchiveError::Upload {
                            artifact: name,
                            remote: self.destination.redacted(),
                            backup,
                            source,
                        })
                    }
                }
            }
            (Destination::Remote(_), None) => Err(ArchiveError::Destination {
                destination: self.destination.redacted(),
                message: "no uploader configured".to_string(),
            }),
            (Destination::Local(dir), _) => {
                let dir = expand_local(dir, &artifact.started_at);
                std::fs::create_dir_all(&dir).map_err(|err| encode_failed(&name, err.into()))?;
                let path = dir.join(&name);
                self.encode(artifact, &path)?;
                Ok(ArchiveOutcome::Stored { path })
            }
        }
    }

    fn encode(&self, artifact: &Artifact, path: &Path) -> Result<(), ArchiveError> {
        log::info!(
            "archive {}: encoding {} ({} frames, {})...",
            self.channel,
            path.display(),
            artifact.len(),
            self.encoder.name()
        );
        self.encoder
            .encode(artifact, path)
            .map_err(|err| encode_failed(&artifact.file_name(), err))
    }

    fn report(&self, artifact: &Artifact, result: &Result<ArchiveOutcome, ArchiveError>) {
        let name = artifact.file_name();
        match result {
            Ok(ArchiveOutcome::Stored { path }) => {
                log::info!("archive {}: stored {}", self.channel, path.display());
            }
            Ok(ArchiveOutcome::Uploaded { remote }) => {
                log::info!("archive {}: uploaded {}", self.channel, remote);
            }
            Err(ArchiveError::Upload { backup, .. }) => {
                log::warn!("archive {}: {} kept at {}", self.channel, name, backup.display());
            }
            Err(err) if err.is_fatal() => {
                log::error!("archive {}: {} LOST: {}", self.channel, name, err);
            }
            Err(err) => {
                log::error!("archive {}: dropping {}: {}", self.channel, name, err);
            }
        }
        let Some(metrics) = &self.metrics else {
            return;
        };
        match result {
            Ok(ArchiveOutcome::Stored { .. }) => metrics.record_stored(),
            Ok(ArchiveOutcome::Uploaded { .. }) => metrics.record_uploaded(),
            Err(ArchiveError::Upload { .. }) => metrics.record_backed_up(),
            Err(_) => metrics.record_failed(),
        }
    }
}

fn encode_failed(artifact: &str, source: EncodeError) -> ArchiveError {
    ArchiveError::Encode {
        artifact: artifact.to_string(),
        source,
    }
}

/// Rename, or copy and remove when the rename crosses filesystems.
fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    std::fs::copy(from, to)?;
    std::fs::remove_file(from)
}

struct Worker {
    artifact: String,
    handle: JoinHandle<Result<ArchiveOutcome, ArchiveError>>,
}

/// Per-channel archive front end. Owned by the dispatch loop.
pub struct ArchiveWriter {
    pipeline: Pipeline,
    workers: Vec<Worker>,
    // Results of artifacts archived inline because no thread could be spawned.
    settled: Vec<Result<ArchiveOutcome, ArchiveError>>,
}

impl ArchiveWriter {
    pub fn new(channel: impl Into<String>, settings: ArchiveSettings) -> Result<Self, ArchiveError> {
        let destination = Destination::parse(&settings.destination)?;
        let uploader = match &destination {
            Destination::Remote(url) => Some(
                uploader_for(url, settings.http_token.clone(), settings.upload_timeout).map_err(
                    |err| ArchiveError::Destination {
                        destination: destination.redacted(),
                        message: err.to_string(),
                    },
                )?,
            ),
            Destination::Local(_) => None,
        };
        Ok(Self {
            pipeline: Pipeline {
                channel: channel.into(),
                destination,
                backup_dir: settings.backup_dir,
                encoder: encoder_for(settings.format, settings.jpeg_quality),
                uploader,
                metrics: None,
            },
            workers: Vec::new(),
            settled: Vec::new(),
        })
    }

    /// Replace the uploader picked from the destination scheme.
    pub fn with_uploader(mut self, uploader: Arc<dyn Uploader>) -> Self {
        self.pipeline.uploader = Some(uploader);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.pipeline.metrics = Some(metrics);
        self
    }

    pub fn destination(&self) -> &Destination {
        &self.pipeline.destination
    }

    /// Archive on the calling thread.
    pub fn archive(&self, artifact: Artifact) -> Result<ArchiveOutcome, ArchiveError> {
        self.pipeline.run(artifact)
    }

    /// Hand `artifact` to a worker thread and return immediately.
    pub fn finalize(&mut self, artifact: Artifact) {
        let name = artifact.file_name();
        let pipeline = self.pipeline.clone();
        // A failed spawn drops the closure, so the artifact is parked where
        // the inline fallback can still reach it.
        let artifact = Arc::new(Mutex::new(Some(artifact)));
        let handed = artifact.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("archive-{}", self.pipeline.channel))
            .spawn(move || {
                let artifact = handed
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                match artifact {
                    Some(artifact) => pipeline.run(artifact),
                    None => Err(ArchiveError::WorkerPanicked {
                        artifact: "unknown".to_string(),
                    }),
                }
            });
        match spawned {
            Ok(handle) => self.workers.push(Worker {
                artifact: name,
                handle,
            }),
            Err(err) => {
                log::warn!("archive {}: no worker thread ({}); archiving inline", self.pipeline.channel, err);
                let artifact = artifact
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                if let Some(artifact) = artifact {
                    let result = self.pipeline.run(artifact);
                    self.settled.push(result);
                }
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.workers.len()
    }

    /// Collect finished workers. Returns how many were collected, or the
    /// first fatal error among them.
    pub fn reap(&mut self) -> Result<usize, ArchiveError> {
        let (finished, running): (Vec<Worker>, Vec<Worker>) = self
            .workers
            .drain(..)
            .partition(|worker| worker.handle.is_finished());
        self.workers = running;
        self.collect(finished)
    }

    /// Wait for every in-flight worker.
    pub fn drain(&mut self) -> Result<usize, ArchiveError> {
        if !self.workers.is_empty() {
            log::info!(
                "archive {}: waiting for {} worker(s)...",
                self.pipeline.channel,
                self.workers.len()
            );
        }
        let workers = std::mem::take(&mut self.workers);
        self.collect(workers)
    }

    fn collect(&mut self, workers: Vec<Worker>) -> Result<usize, ArchiveError> {
        let mut results = std::mem::take(&mut self.settled);
        for worker in workers {
            let result = worker.handle.join().unwrap_or_else(|_| {
                log::error!("archive {}: worker for {} panicked", self.pipeline.channel, worker.artifact);
                Err(ArchiveError::WorkerPanicked {
                    artifact: worker.artifact,
                })
            });
            results.push(result);
        }
        let count = results.len();
        match results.into_iter().filter_map(Result::err).find(ArchiveError::is_fatal) {
            Some(fatal) => Err(fatal),
            None => Ok(count),
        }
    }
}

impl Drop for ArchiveWriter {
    fn drop(&mut self) {
        if let Err(err) = self.drain() {
            log::error!("archive {}: {}", self.pipeline.channel, err);
        }
    }
}
