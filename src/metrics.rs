//! Loop pacing and pipeline counters.
//!
//! Every loop (source acquisition, dispatch, observers) owns its own
//! `LoopTimer`; nothing is kept in thread-locals or globals.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

pub const DEFAULT_REPORT_FRAMES: usize = 60;

/// Paces a loop to a target rate and periodically logs the achieved rate.
pub struct LoopTimer {
    label: String,
    target: Duration,
    report_frames: usize,
    started: Option<Instant>,
    work: Duration,
    slept: Duration,
    samples: usize,
}

impl LoopTimer {
    /// `fps <= 0` disables pacing; the loop then runs as fast as it can.
    pub fn new(label: impl Into<String>, fps: f64, report_frames: usize) -> Self {
        let target = if fps > 0.0 && fps.is_finite() {
            Duration::from_secs_f64(1.0 / fps)
        } else {
            Duration::ZERO
        };
        Self {
            label: label.into(),
            target,
            report_frames,
            started: None,
            work: Duration::ZERO,
            slept: Duration::ZERO,
            samples: 0,
        }
    }

    pub fn target(&self) -> Duration {
        self.target
    }

    pub fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    /// Sleep off whatever is left of the target period. Returns the sleep.
    pub fn end(&mut self) -> Duration {
        let work = self
            .started
            .take()
            .map(|started| started.elapsed())
            .unwrap_or_default();
        let sleep = self.remaining(work);
        if !sleep.is_zero() {
            std::thread::sleep(sleep);
        } else if !self.target.is_zero() && work > self.target {
            log::warn!(
                "{} took too long: {:.3}s vs target {:.3}s",
                self.label,
                work.as_secs_f64(),
                self.target.as_secs_f64()
            );
        }
        self.record(work, sleep);
        sleep
    }

    fn remaining(&self, work: Duration) -> Duration {
        self.target.saturating_sub(work)
    }

    fn record(&mut self, work: Duration, sleep: Duration) {
        self.work += work;
        self.slept += sleep;
        self.samples += 1;
        if self.report_frames == 0 || self.samples < self.report_frames {
            return;
        }
        if let Some(fps) = self.average_fps() {
            log::info!("{} fps: {:.1}", self.label, fps);
        }
        self.work = Duration::ZERO;
        self.slept = Duration::ZERO;
        self.samples = 0;
    }

    /// Average loop rate over the current reporting window.
    pub fn average_fps(&self) -> Option<f64> {
        if self.samples == 0 {
            return None;
        }
        let per_loop = (self.work + self.slept).as_secs_f64() / self.samples as f64;
        if per_loop <= 0.0 {
            return None;
        }
        Some(1.0 / per_loop)
    }
}

/// Counters shared between the dispatcher and whoever wants to report on it.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    frames_processed: AtomicU64,
    stale_skips: AtomicU64,
    movement_events: AtomicU64,
    detector_errors: AtomicU64,
    artifacts_finalized: AtomicU64,
    artifacts_stored: AtomicU64,
    artifacts_uploaded: AtomicU64,
    artifacts_backed_up: AtomicU64,
    artifacts_failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineMetricsSnapshot {
    pub frames_processed: u64,
    pub stale_skips: u64,
    pub movement_events: u64,
    pub detector_errors: u64,
    pub artifacts_finalized: u64,
    pub artifacts_stored: u64,
    pub artifacts_uploaded: u64,
    pub artifacts_backed_up: u64,
    pub artifacts_failed: u64,
}

impl PipelineMetrics {
    pub fn record_frame(&self) {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale(&self) {
        self.stale_skips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_movement(&self) {
        self.movement_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_detector_error(&self) {
        self.detector_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_finalized(&self) {
        self.artifacts_finalized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stored(&self) {
        self.artifacts_stored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_uploaded(&self) {
        self.artifacts_uploaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backed_up(&self) {
        self.artifacts_backed_up.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.artifacts_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> PipelineMetricsSnapshot {
        PipelineMetricsSnapshot {
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            stale_skips: self.stale_skips.load(Ordering::Relaxed),
            movement_events: self.movement_events.load(Ordering::Relaxed),
            detector_errors: self.detector_errors.load(Ordering::Relaxed),
            artifacts_finalized: self.artifacts_finalized.load(Ordering::Relaxed),
            artifacts_stored: self.artifacts_stored.load(Ordering::Relaxed),
            artifacts_uploaded: self.artifacts_uploaded.load(Ordering::Relaxed),
            artifacts_backed_up: self.artifacts_backed_up.load(Ordering::Relaxed),
            artifacts_failed: self.artifacts_failed.load(Ordering::Relaxed),
        }
    }
}
