use serde::Deserialize;

use super::artifact::{Artifact, ArtifactFormat, DEFAULT_TIMESTAMP_FORMAT};
use crate::detect::DetectionKind;
use crate::frame::Frame;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapturePolicy {
    /// Accumulate movement plus grace frames into one clip.
    #[default]
    Video,
    /// Every movement frame becomes its own still.
    Photo,
}

impl CapturePolicy {
    pub fn format(&self) -> ArtifactFormat {
        match self {
            Self::Video => ArtifactFormat::Video,
            Self::Photo => ArtifactFormat::Photo,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Accumulating,
    /// Grace exhausted; the next quiet frame closes the artifact.
    GraceHold,
}

#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub policy: CapturePolicy,
    /// Quiet frames still appended after movement stops.
    pub grace_frames: u32,
    /// Upper bound on frames per artifact. Values below 1 are treated as 1.
    pub max_frames: usize,
    pub timestamp_format: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            policy: CapturePolicy::Video,
            grace_frames: 0,
            max_frames: 100,
            timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
        }
    }
}

/// Per-channel capture state machine.
///
/// Not thread safe by construction: the owning dispatch loop calls
/// `handle_frame` once per processed frame.
pub struct CaptureSession {
    channel: String,
    settings: SessionSettings,
    state: SessionState,
    pending: Option<Artifact>,
    grace_remaining: u32,
}

impl CaptureSession {
    pub fn new(channel: impl Into<String>, mut settings: SessionSettings) -> Self {
        settings.max_frames = settings.max_frames.max(1);
        Self {
            channel: channel.into(),
            settings,
            state: SessionState::Idle,
            pending: None,
            grace_remaining: 0,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn policy(&self) -> CapturePolicy {
        self.settings.policy
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn frame_count(&self) -> usize {
        self.pending.as_ref().map_or(0, Artifact::len)
    }

    pub fn grace_remaining(&self) -> u32 {
        self.grace_remaining
    }

    /// Advance the state machine by one frame.
    ///
    /// Returns the artifact this frame completed, if any.
    pub fn handle_frame(&mut self, kind: DetectionKind, frame: &Frame) -> Option<Artifact> {
        match self.settings.policy {
            CapturePolicy::Photo => self.handle_photo(kind, frame),
            CapturePolicy::Video => self.handle_video(kind, frame),
        }
    }

    fn handle_photo(&mut self, kind: DetectionKind, frame: &Frame) -> Option<Artifact> {
        if kind != DetectionKind::Movement {
            return None;
        }
        let artifact = self.begin(frame.clone());
        log::debug!("capture {}: photo {}", self.channel, artifact.file_name());
        Some(artifact)
    }

    fn handle_video(&mut self, kind: DetectionKind, frame: &Frame) -> Option<Artifact> {
        match kind {
            DetectionKind::Movement => {
                let finished = self.append(frame);
                self.grace_remaining = self.settings.grace_frames;
                self.state = SessionState::Accumulating;
                finished
            }
            DetectionKind::Ignored => {
                if self.pending.is_none() {
                    return None;
                }
                if self.grace_remaining == 0 {
                    return self.finalize();
                }
                let finished = self.append(frame);
                self.grace_remaining -= 1;
                self.state = if self.grace_remaining == 0 {
                    SessionState::GraceHold
                } else {
                    SessionState::Accumulating
                };
                finished
            }
        }
    }

    /// Append `frame`, first closing the current artifact if it is full.
    fn append(&mut self, frame: &Frame) -> Option<Artifact> {
        let full = self
            .pending
            .as_ref()
            .is_some_and(|pending| pending.len() >= self.settings.max_frames);
        let finished = if full {
            log::info!(
                "capture {}: reached {} frames, starting next chunk",
                self.channel,
                self.settings.max_frames
            );
            self.pending.take()
        } else {
            None
        };

        match self.pending.as_mut() {
            Some(pending) => pending.frames.push(frame.clone()),
            None => {
                let artifact = self.begin(frame.clone());
                log::info!(
                    "capture {}: starting {}",
                    self.channel,
                    artifact.file_name()
                );
                self.pending = Some(artifact);
            }
        }
        finished
    }

    fn begin(&self, frame: Frame) -> Artifact {
        Artifact::begin(
            &self.channel,
            self.settings.policy.format(),
            &self.settings.timestamp_format,
            frame,
        )
    }

    /// Close whatever is pending. A session with no frames yields nothing.
    pub fn finalize(&mut self) -> Option<Artifact> {
        self.state = SessionState::Idle;
        self.grace_remaining = 0;
        let artifact = self.pending.take()?;
        log::info!(
            "capture {}: finalized {} ({} frames)",
            self.channel,
            artifact.file_name(),
            artifact.len()
        );
        Some(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(grace_frames: u32, max_frames: usize) -> CaptureSession {
        CaptureSession::new(
            "test",
            SessionSettings {
                grace_frames,
                max_frames,
                ..SessionSettings::default()
            },
        )
    }

    fn frame(sequence: u64) -> Frame {
        Frame::filled(4, 4, [9, 9, 9]).unwrap().with_sequence(sequence)
    }

    fn sequences(artifact: &Artifact) -> Vec<u64> {
        artifact.frames.iter().map(Frame::sequence).collect()
    }

    #[test]
    fn idle_ignores_quiet_frames() {
        let mut s = session(3, 10);
        assert!(s.handle_frame(DetectionKind::Ignored, &frame(1)).is_none());
        assert_eq!(s.state(), SessionState::Idle);
        assert_eq!(s.frame_count(), 0);
    }

    #[test]
    fn grace_frames_extend_the_artifact() {
        let mut s = session(2, 10);
        assert!(s.handle_frame(DetectionKind::Movement, &frame(1)).is_none());
        assert_eq!(s.state(), SessionState::Accumulating);
        assert_eq!(s.grace_remaining(), 2);

        assert!(s.handle_frame(DetectionKind::Ignored, &frame(2)).is_none());
        assert_eq!(s.state(), SessionState::Accumulating);
        assert!(s.handle_frame(DetectionKind::Ignored, &frame(3)).is_none());
        assert_eq!(s.state(), SessionState::GraceHold);

        let artifact = s.handle_frame(DetectionKind::Ignored, &frame(4)).unwrap();
        assert_eq!(sequences(&artifact), vec![1, 2, 3]);
        assert_eq!(s.state(), SessionState::Idle);
    }

    #[test]
    fn movement_during_grace_hold_resumes() {
        let mut s = session(1, 10);
        s.handle_frame(DetectionKind::Movement, &frame(1));
        s.handle_frame(DetectionKind::Ignored, &frame(2));
        assert_eq!(s.state(), SessionState::GraceHold);
        s.handle_frame(DetectionKind::Movement, &frame(3));
        assert_eq!(s.state(), SessionState::Accumulating);
        assert_eq!(s.grace_remaining(), 1);
        assert_eq!(s.frame_count(), 3);
    }

    #[test]
    fn zero_grace_closes_on_first_quiet_frame() {
        let mut s = session(0, 10);
        s.handle_frame(DetectionKind::Movement, &frame(1));
        s.handle_frame(DetectionKind::Movement, &frame(2));
        let artifact = s.handle_frame(DetectionKind::Ignored, &frame(3)).unwrap();
        assert_eq!(sequences(&artifact), vec![1, 2]);
    }

    #[test]
    fn cap_starts_next_chunk_with_triggering_frame() {
        let mut s = session(5, 3);
        let mut artifacts = Vec::new();
        for seq in 1..=7 {
            artifacts.extend(s.handle_frame(DetectionKind::Movement, &frame(seq)));
        }
        artifacts.extend(s.finalize());
        let chunks: Vec<Vec<u64>> = artifacts.iter().map(sequences).collect();
        assert_eq!(chunks, vec![vec![1, 2, 3], vec![4, 5, 6], vec![7]]);
    }

    #[test]
    fn grace_frame_at_cap_also_starts_next_chunk() {
        let mut s = session(3, 2);
        assert!(s.handle_frame(DetectionKind::Movement, &frame(1)).is_none());
        assert!(s.handle_frame(DetectionKind::Ignored, &frame(2)).is_none());
        let first = s.handle_frame(DetectionKind::Ignored, &frame(3)).unwrap();
        assert_eq!(sequences(&first), vec![1, 2]);
        assert_eq!(s.frame_count(), 1);
        assert_eq!(s.grace_remaining(), 1);
    }

    #[test]
    fn finalize_without_frames_is_a_no_op() {
        let mut s = session(3, 10);
        assert!(s.finalize().is_none());
        assert_eq!(s.state(), SessionState::Idle);
    }

    #[test]
    fn photo_policy_emits_one_still_per_movement() {
        let mut s = CaptureSession::new(
            "stills",
            SessionSettings {
                policy: CapturePolicy::Photo,
                grace_frames: 10,
                ..SessionSettings::default()
            },
        );
        assert!(s.handle_frame(DetectionKind::Ignored, &frame(1)).is_none());
        let photo = s.handle_frame(DetectionKind::Movement, &frame(2)).unwrap();
        assert_eq!(photo.format, ArtifactFormat::Photo);
        assert_eq!(sequences(&photo), vec![2]);
        assert!(photo.file_name().ends_with(".jpg"));
        assert_eq!(s.state(), SessionState::Idle);
        assert!(s.finalize().is_none());
    }

    #[test]
    fn concatenated_artifacts_reproduce_captured_frames() {
        let pattern = [
            true, false, false, true, true, true, false, false, false, false, true, false,
        ];
        let mut s = session(2, 3);
        let mut artifacts = Vec::new();
        let mut expected = Vec::new();
        let mut grace = 0;
        let mut open = false;
        for (i, movement) in pattern.iter().enumerate() {
            let seq = i as u64 + 1;
            let kind = if *movement {
                DetectionKind::Movement
            } else {
                DetectionKind::Ignored
            };
            if *movement {
                expected.push(seq);
                grace = 2;
                open = true;
            } else if open && grace > 0 {
                expected.push(seq);
                grace -= 1;
            } else {
                open = false;
            }
            artifacts.extend(s.handle_frame(kind, &frame(seq)));
        }
        artifacts.extend(s.finalize());

        assert!(artifacts.iter().all(|a| a.len() <= 3));
        let all: Vec<u64> = artifacts.iter().flat_map(sequences).collect();
        assert_eq!(all, expected);
    }
}
