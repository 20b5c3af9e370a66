//! The per-camera control loop.
//!
//! One tick takes the newest frame from the source endpoint, runs the
//! detector, fans the result out to notifiers, capture channels and
//! observers, and collects finished archive workers. Nothing in a tick waits
//! on a consumer: capture channels hand artifacts to worker threads and
//! observers sit behind their own bus.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::archive::{encode_jpeg, ArchiveWriter, DEFAULT_JPEG_QUALITY};
use crate::bus::{FrameBus, SlotEndpoint};
use crate::capture::CaptureSession;
use crate::detect::{DetectionEvent, Detector};
use crate::error::{ArchiveError, DispatchError};
use crate::frame::Frame;
use crate::ingest::SourceHandle;
use crate::metrics::{LoopTimer, PipelineMetrics, DEFAULT_REPORT_FRAMES};
use crate::notify::Notifier;
use crate::overlay::{self, MOTION_COLOR, MOTION_THICKNESS};

/// A capture session and the writer its artifacts go to.
pub struct CaptureChannel {
    session: CaptureSession,
    writer: ArchiveWriter,
}

impl CaptureChannel {
    pub fn new(session: CaptureSession, writer: ArchiveWriter) -> Self {
        Self { session, writer }
    }

    pub fn name(&self) -> &str {
        self.session.channel()
    }

    pub fn session(&self) -> &CaptureSession {
        &self.session
    }

    pub fn writer_mut(&mut self) -> &mut ArchiveWriter {
        &mut self.writer
    }

    fn flush(&mut self, metrics: &PipelineMetrics) -> Result<usize, ArchiveError> {
        if let Some(artifact) = self.session.finalize() {
            metrics.record_finalized();
            self.writer.finalize(artifact);
        }
        self.writer.drain()
    }
}

#[derive(Clone, Debug)]
pub struct DispatchSettings {
    pub fps: f64,
    pub report_frames: usize,
    /// Outline the movement region on frames sent to observers.
    pub highlight_motion: bool,
    pub snapshot_quality: u8,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            fps: 15.0,
            report_frames: DEFAULT_REPORT_FRAMES,
            highlight_motion: true,
            snapshot_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing has been published yet.
    NotReady,
    /// No frame newer than the last one processed.
    Stale,
    Processed { movement: bool, finalized: usize },
}

pub struct Dispatcher {
    settings: DispatchSettings,
    endpoint: SlotEndpoint,
    detector: Box<dyn Detector>,
    channels: Vec<CaptureChannel>,
    notifiers: Vec<Box<dyn Notifier>>,
    observers: FrameBus,
    running: Arc<AtomicBool>,
    timer: LoopTimer,
    metrics: Arc<PipelineMetrics>,
    last_sequence: Option<u64>,
}

impl Dispatcher {
    pub fn new(settings: DispatchSettings, endpoint: SlotEndpoint, detector: Box<dyn Detector>) -> Self {
        let timer = LoopTimer::new("dispatch", settings.fps, settings.report_frames);
        Self {
            settings,
            endpoint,
            detector,
            channels: Vec::new(),
            notifiers: Vec::new(),
            observers: FrameBus::new(),
            running: Arc::new(AtomicBool::new(true)),
            timer,
            metrics: Arc::new(PipelineMetrics::default()),
            last_sequence: None,
        }
    }

    pub fn add_channel(&mut self, channel: CaptureChannel) {
        log::info!("dispatch: capture channel {} ready", channel.name());
        self.channels.push(channel);
    }

    pub fn add_notifier(&mut self, notifier: Box<dyn Notifier>) {
        log::debug!("dispatch: notifier {} registered", notifier.name());
        self.notifiers.push(notifier);
    }

    pub fn channels(&self) -> &[CaptureChannel] {
        &self.channels
    }

    /// Bus carrying every processed frame to observers.
    pub fn observers(&self) -> &FrameBus {
        &self.observers
    }

    /// Clearing the flag makes `run` finish after the current tick.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        self.metrics.clone()
    }

    /// One iteration of the loop. Only fatal archive errors are returned.
    pub fn tick(&mut self) -> Result<TickOutcome, DispatchError> {
        if !self.endpoint.is_ready() {
            return Ok(TickOutcome::NotReady);
        }
        if self.endpoint.is_stale() {
            self.metrics.record_stale();
            return Ok(TickOutcome::Stale);
        }
        let Some(frame) = self.endpoint.acquire() else {
            return Ok(TickOutcome::NotReady);
        };
        if self
            .last_sequence
            .is_some_and(|last| frame.sequence() <= last)
        {
            self.metrics.record_stale();
            return Ok(TickOutcome::Stale);
        }
        self.last_sequence = Some(frame.sequence());
        self.metrics.record_frame();

        let event = self.detect(&frame);
        let movement = event.is_movement();
        if movement {
            self.metrics.record_movement();
        }
        self.notify(&event);

        let mut finalized = 0;
        for channel in &mut self.channels {
            if let Some(artifact) = channel.session.handle_frame(event.kind, &frame) {
                self.metrics.record_finalized();
                channel.writer.finalize(artifact);
                finalized += 1;
            }
        }

        self.observe(&event, &frame);

        for channel in &mut self.channels {
            channel.writer.reap()?;
        }
        Ok(TickOutcome::Processed { movement, finalized })
    }

    fn detect(&mut self, frame: &Frame) -> DetectionEvent {
        match self.detector.detect(frame) {
            Ok(event) => event,
            Err(err) => {
                log::warn!("dispatch: detector {} failed: {}", self.detector.name(), err);
                self.metrics.record_detector_error();
                DetectionEvent::ignored(frame.clone())
            }
        }
    }

    fn notify(&self, event: &DetectionEvent) {
        let (w, h) = event.dimensions;
        if w == 0 && h == 0 {
            return;
        }
        let (x, y) = event.position;
        let subject = event.kind.as_str();
        let message = format!("{w}x{h} at {x}, {y}");
        let mut snapshot: Option<Vec<u8>> = None;
        for notifier in &self.notifiers {
            notifier.send(subject, &message);
            if !event.is_movement() || !notifier.wants_snapshots() {
                continue;
            }
            if snapshot.is_none() {
                match encode_jpeg(&event.frame, self.settings.snapshot_quality) {
                    Ok(jpeg) => snapshot = Some(jpeg),
                    Err(err) => {
                        log::warn!("dispatch: snapshot encoding failed: {err}");
                        continue;
                    }
                }
            }
            if let Some(jpeg) = &snapshot {
                notifier.snapshot(subject, jpeg);
            }
        }
    }

    fn observe(&self, event: &DetectionEvent, frame: &Frame) {
        if self.observers.subscriber_count() == 0 {
            return;
        }
        if self.settings.highlight_motion && event.is_movement() {
            match overlay::outline(frame, event.region(), MOTION_COLOR, MOTION_THICKNESS) {
                Ok(boxed) => return self.observers.publish(&boxed),
                Err(err) => log::debug!("dispatch: overlay skipped: {err}"),
            }
        }
        self.observers.publish(frame);
    }

    /// Tick at the configured rate until the running flag clears or a fatal
    /// error occurs, then flush every channel.
    pub fn run(&mut self, source: &mut SourceHandle) -> Result<(), DispatchError> {
        log::info!(
            "dispatch: running at {:.1} fps with detector {}",
            self.settings.fps,
            self.detector.name()
        );
        let result = loop {
            if !self.running.load(Ordering::SeqCst) {
                break Ok(());
            }
            self.timer.start();
            if let Err(err) = source.check() {
                break Err(DispatchError::from(err));
            }
            if let Err(err) = self.tick() {
                break Err(err);
            }
            self.timer.end();
        };
        let flushed = self.shutdown();
        result.and(flushed)
    }

    /// Close open sessions and wait for every archive worker.
    pub fn shutdown(&mut self) -> Result<(), DispatchError> {
        self.running.store(false, Ordering::SeqCst);
        let mut first_fatal = None;
        for channel in &mut self.channels {
            match channel.flush(&self.metrics) {
                Ok(count) => log::debug!("dispatch: channel {} flushed {} artifact(s)", channel.name(), count),
                Err(err) => {
                    log::error!("dispatch: channel {}: {}", channel.name(), err);
                    first_fatal.get_or_insert(err);
                }
            }
        }
        log::info!(
            "dispatch: stopped; {}",
            serde_json::to_string(&self.metrics.snapshot()).unwrap_or_default()
        );
        match first_fatal {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}
