use sha2::{Digest, Sha256};

use crate::detect::detector::{DetectionEvent, Detector};
use crate::error::DetectorError;
use crate::frame::{Frame, Rect};

/// Stub detector for testing. Any pixel change counts as whole-frame movement.
#[derive(Default)]
pub struct StubDetector {
    last_hash: Option<[u8; 32]>,
}

impl StubDetector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Detector for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &Frame) -> Result<DetectionEvent, DetectorError> {
        let current_hash: [u8; 32] = Sha256::digest(frame.pixels()).into();
        let motion = self.last_hash.is_some_and(|prev| prev != current_hash);
        self.last_hash = Some(current_hash);

        if motion {
            let (width, height) = frame.dimensions();
            Ok(DetectionEvent::movement(
                frame.clone(),
                Rect::new(0, 0, width, height),
            ))
        } else {
            Ok(DetectionEvent::ignored(frame.clone()))
        }
    }
}
