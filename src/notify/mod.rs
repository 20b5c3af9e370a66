//! Best-effort event fan-out.
//!
//! Notifiers never report failure to the caller: a broker that is down or a
//! full publish queue is logged and the message dropped.

mod logger;
mod mqtt;

pub use logger::LoggerNotifier;
pub use mqtt::{MqttNotifier, MqttSettings};

pub trait Notifier: Send {
    fn name(&self) -> &'static str;

    fn send(&self, subject: &str, message: &str);

    /// Publish an encoded JPEG. Only called when `wants_snapshots` is true.
    fn snapshot(&self, _subject: &str, _jpeg: &[u8]) {}

    fn wants_snapshots(&self) -> bool {
        false
    }
}
