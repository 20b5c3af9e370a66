pub mod motion;
pub mod stub;

pub use motion::MotionDetector;
pub use stub::StubDetector;
