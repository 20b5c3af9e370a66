use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use super::device::Device;
use crate::bus::FrameBus;
use crate::error::SourceError;
use crate::metrics::{LoopTimer, DEFAULT_REPORT_FRAMES};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceState {
    /// No frame has been read from the device yet.
    Connecting,
    Streaming,
    /// The device was streaming and lost; reopened on every iteration.
    Reconnecting,
}

#[derive(Clone, Debug)]
pub struct SourceSettings {
    pub name: String,
    pub fps: f64,
    /// Consecutive failed iterations tolerated before giving up. 0 = never give up.
    pub max_failures: u32,
    pub report_frames: usize,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            name: "camera".to_string(),
            fps: 15.0,
            max_failures: 0,
            report_frames: DEFAULT_REPORT_FRAMES,
        }
    }
}

/// Result of one acquisition iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceStep {
    Published(u64),
    Failed { attempts: u32 },
}

struct SourceShared {
    running: AtomicBool,
    state: Mutex<SourceState>,
    failures: AtomicU32,
    width: AtomicU32,
    height: AtomicU32,
    published: AtomicU64,
}

impl SourceShared {
    fn state(&self) -> SourceState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: SourceState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

/// Owns a capture device and publishes what it reads.
pub struct Source {
    settings: SourceSettings,
    device: Box<dyn Device>,
    bus: FrameBus,
    shared: Arc<SourceShared>,
    sequence: u64,
}

impl Source {
    pub fn new(settings: SourceSettings, device: Box<dyn Device>, bus: FrameBus) -> Self {
        Self {
            settings,
            device,
            bus,
            shared: Arc::new(SourceShared {
                running: AtomicBool::new(true),
                state: Mutex::new(SourceState::Connecting),
                failures: AtomicU32::new(0),
                width: AtomicU32::new(0),
                height: AtomicU32::new(0),
                published: AtomicU64::new(0),
            }),
            sequence: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn state(&self) -> SourceState {
        self.shared.state()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.shared.failures.load(Ordering::Relaxed)
    }

    /// Cached frame geometry; `(0, 0)` until the device reports it.
    pub fn dimensions(&self) -> (u32, u32) {
        (
            self.shared.width.load(Ordering::Relaxed),
            self.shared.height.load(Ordering::Relaxed),
        )
    }

    /// One acquisition iteration: (re)open if needed, read, publish.
    ///
    /// Returns `Err` only when the consecutive failure bound is crossed.
    pub fn step(&mut self) -> Result<SourceStep, SourceError> {
        if !self.device.is_open() {
            if let Err(err) = self.device.open() {
                return self.fail(err);
            }
        }
        self.cache_dimensions();

        match self.device.read() {
            Ok(frame) => {
                self.sequence += 1;
                let frame = frame.with_sequence(self.sequence);
                self.bus.publish(&frame);
                self.shared.published.fetch_add(1, Ordering::Relaxed);

                let previous = self.shared.failures.swap(0, Ordering::Relaxed);
                if self.shared.state() != SourceState::Streaming {
                    log::info!(
                        "source {}: streaming from {} after {} failed attempt(s)",
                        self.settings.name,
                        self.device.describe(),
                        previous
                    );
                    self.shared.set_state(SourceState::Streaming);
                }
                Ok(SourceStep::Published(self.sequence))
            }
            Err(err) => self.fail(err),
        }
    }

    fn cache_dimensions(&self) {
        if self.shared.width.load(Ordering::Relaxed) != 0 {
            return;
        }
        if let Some((width, height)) = self.device.dimensions() {
            self.shared.width.store(width, Ordering::Relaxed);
            self.shared.height.store(height, Ordering::Relaxed);
        }
    }

    fn fail(&mut self, err: SourceError) -> Result<SourceStep, SourceError> {
        self.device.release();
        let attempts = self.shared.failures.fetch_add(1, Ordering::Relaxed) + 1;
        let next = match self.shared.state() {
            SourceState::Connecting => SourceState::Connecting,
            SourceState::Streaming | SourceState::Reconnecting => SourceState::Reconnecting,
        };
        self.shared.set_state(next);
        log::warn!(
            "source {}: attempt {} failed: {}",
            self.settings.name,
            attempts,
            err
        );

        if self.settings.max_failures > 0 && attempts > self.settings.max_failures {
            return Err(SourceError::Exhausted {
                device: self.device.describe(),
                attempts,
            });
        }
        Ok(SourceStep::Failed { attempts })
    }

    /// Run the acquisition loop on its own thread.
    pub fn spawn(mut self) -> std::io::Result<SourceHandle> {
        let shared = self.shared.clone();
        let name = self.settings.name.clone();
        let thread = std::thread::Builder::new()
            .name(format!("source-{name}"))
            .spawn(move || self.run())?;
        Ok(SourceHandle {
            name,
            shared,
            thread: Some(thread),
        })
    }

    fn run(mut self) -> Result<(), SourceError> {
        let mut timer = LoopTimer::new(
            format!("source {}", self.settings.name),
            self.settings.fps,
            self.settings.report_frames,
        );
        log::info!(
            "source {}: acquiring from {}",
            self.settings.name,
            self.device.describe()
        );
        let result = loop {
            if !self.shared.running.load(Ordering::Relaxed) {
                break Ok(());
            }
            timer.start();
            if let Err(err) = self.step() {
                log::error!("source {}: {}", self.settings.name, err);
                break Err(err);
            }
            timer.end();
        };
        self.shared.running.store(false, Ordering::Relaxed);
        self.device.release();
        result
    }
}

/// Control side of a spawned `Source`.
pub struct SourceHandle {
    name: String,
    shared: Arc<SourceShared>,
    thread: Option<JoinHandle<Result<(), SourceError>>>,
}

impl SourceHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SourceState {
        self.shared.state()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.shared.failures.load(Ordering::Relaxed)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (
            self.shared.width.load(Ordering::Relaxed),
            self.shared.height.load(Ordering::Relaxed),
        )
    }

    pub fn frames_published(&self) -> u64 {
        self.shared.published.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Relaxed)
    }

    /// Surface the error that ended the acquisition thread, if it has ended.
    pub fn check(&mut self) -> Result<(), SourceError> {
        let finished = self
            .thread
            .as_ref()
            .map(JoinHandle::is_finished)
            .unwrap_or(false);
        if finished {
            return self.join();
        }
        Ok(())
    }

    /// Ask the thread to stop and wait for it.
    pub fn stop(&mut self) -> Result<(), SourceError> {
        self.shared.running.store(false, Ordering::Relaxed);
        self.join()
    }

    fn join(&mut self) -> Result<(), SourceError> {
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| SourceError::Panicked {
                device: self.name.clone(),
            })?,
            None => Ok(()),
        }
    }
}

impl Drop for SourceHandle {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use std::collections::VecDeque;
    use std::time::{Duration, Instant};

    /// Device that replays a script of read outcomes (true = frame).
    struct ScriptedDevice {
        script: VecDeque<bool>,
        open: bool,
        opens: usize,
    }

    impl ScriptedDevice {
        fn new(script: &[bool]) -> Self {
            Self {
                script: script.iter().copied().collect(),
                open: false,
                opens: 0,
            }
        }
    }

    impl Device for ScriptedDevice {
        fn describe(&self) -> String {
            "scripted".to_string()
        }

        fn open(&mut self) -> Result<(), SourceError> {
            self.open = true;
            self.opens += 1;
            Ok(())
        }

        fn release(&mut self) {
            self.open = false;
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn dimensions(&self) -> Option<(u32, u32)> {
            Some((8, 6))
        }

        fn read(&mut self) -> Result<Frame, SourceError> {
            match self.script.pop_front() {
                Some(true) | None => Ok(Frame::filled(8, 6, [1, 2, 3])?),
                Some(false) => Err(SourceError::disconnected("scripted", "read failed")),
            }
        }
    }

    fn settings(max_failures: u32) -> SourceSettings {
        SourceSettings {
            name: "test".to_string(),
            fps: 0.0,
            max_failures,
            report_frames: 0,
        }
    }

    #[test]
    fn first_frame_moves_to_streaming() {
        let bus = FrameBus::new();
        let endpoint = bus.subscribe();
        let mut source = Source::new(settings(0), Box::new(ScriptedDevice::new(&[])), bus);
        assert_eq!(source.state(), SourceState::Connecting);
        assert_eq!(source.dimensions(), (0, 0));
        assert_eq!(source.step().unwrap(), SourceStep::Published(1));
        assert_eq!(source.state(), SourceState::Streaming);
        assert_eq!(source.dimensions(), (8, 6));
        assert_eq!(endpoint.acquire().unwrap().sequence(), 1);
    }

    #[test]
    fn failures_before_first_frame_stay_connecting() {
        let device = ScriptedDevice::new(&[false, false, true]);
        let mut source = Source::new(settings(0), Box::new(device), FrameBus::new());
        assert_eq!(source.step().unwrap(), SourceStep::Failed { attempts: 1 });
        assert_eq!(source.state(), SourceState::Connecting);
        source.step().unwrap();
        assert_eq!(source.step().unwrap(), SourceStep::Published(1));
        assert_eq!(source.state(), SourceState::Streaming);
    }

    #[test]
    fn exceeding_bound_is_fatal() {
        let device = ScriptedDevice::new(&[true, false, false, false]);
        let mut source = Source::new(settings(2), Box::new(device), FrameBus::new());
        source.step().unwrap();
        assert!(source.step().is_ok());
        assert!(source.step().is_ok());
        assert!(matches!(
            source.step(),
            Err(SourceError::Exhausted { attempts: 3, .. })
        ));
        assert_eq!(source.state(), SourceState::Reconnecting);
    }

    #[test]
    fn spawned_source_reports_exhaustion() {
        let device = ScriptedDevice::new(&[false, false]);
        let mut handle = Source::new(settings(1), Box::new(device), FrameBus::new())
            .spawn()
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.is_running() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!handle.is_running());
        assert!(matches!(handle.stop(), Err(SourceError::Exhausted { .. })));
        // Once joined, the error is not reported twice.
        assert!(handle.check().is_ok());
    }

    #[test]
    fn stop_joins_the_thread() {
        let bus = FrameBus::new();
        let endpoint = bus.subscribe();
        let mut handle = Source::new(
            SourceSettings {
                fps: 200.0,
                ..settings(0)
            },
            Box::new(ScriptedDevice::new(&[])),
            bus,
        )
        .spawn()
        .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !endpoint.is_ready() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        handle.stop().unwrap();
        assert!(handle.frames_published() > 0);
        assert!(!handle.is_running());
    }
}
