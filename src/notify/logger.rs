use super::Notifier;

/// Writes events to the process log.
#[derive(Default)]
pub struct LoggerNotifier;

impl Notifier for LoggerNotifier {
    fn name(&self) -> &'static str {
        "logger"
    }

    fn send(&self, subject: &str, message: &str) {
        if subject == "ignored" {
            log::debug!("{subject}: {message}");
        } else {
            log::info!("{subject}: {message}");
        }
    }
}
