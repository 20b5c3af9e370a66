use rumqttc::v5::mqttbytes::v5::LastWill;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{Client, Connection, Event, Incoming, MqttOptions};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::Notifier;

const PAYLOAD_ONLINE: &str = "online";
const PAYLOAD_DIED: &str = "died";
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// Prefix for every published topic.
    pub topic: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Publish JPEG snapshots of movement.
    pub snapshots: bool,
    pub snapshot_retain: bool,
    pub keep_alive_secs: u64,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            client_id: "doorbot".to_string(),
            topic: "doorbot".to_string(),
            username: None,
            password: None,
            snapshots: false,
            snapshot_retain: false,
            keep_alive_secs: 60,
        }
    }
}

/// MQTT v5 publisher.
///
/// Topics, relative to the configured prefix:
/// - `<subject>` for events
/// - `snapshot/<subject>` and `snapshot/<subject>/timestamp` for images
/// - `error`: `online` after every connect, `died` as last will
pub struct MqttNotifier {
    client: Client,
    topic: String,
    snapshots: bool,
    snapshot_retain: bool,
    running: Arc<AtomicBool>,
    connection: Option<JoinHandle<()>>,
}

impl MqttNotifier {
    pub fn new(settings: &MqttSettings) -> std::io::Result<Self> {
        let topic = settings.topic.trim_end_matches('/').to_string();
        let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs.max(5)));
        options.set_clean_start(true);
        if let Some(user) = &settings.username {
            options.set_credentials(user, settings.password.clone().unwrap_or_default());
        }
        options.set_last_will(LastWill::new(
            status_topic(&topic),
            PAYLOAD_DIED.as_bytes().to_vec(),
            QoS::AtLeastOnce,
            false,
            None,
        ));

        log::info!("connecting to MQTT at {}:{}...", settings.host, settings.port);
        let (client, connection) = Client::new(options, 10);
        let running = Arc::new(AtomicBool::new(true));
        let handle = std::thread::Builder::new().name("mqtt".to_string()).spawn({
            let client = client.clone();
            let topic = topic.clone();
            let running = running.clone();
            move || drive(connection, client, topic, running)
        })?;

        Ok(Self {
            client,
            topic,
            snapshots: settings.snapshots,
            snapshot_retain: settings.snapshot_retain,
            running,
            connection: Some(handle),
        })
    }

    fn publish(&self, topic: String, retain: bool, payload: Vec<u8>) {
        let size = payload.len();
        if let Err(err) = self
            .client
            .try_publish(topic.clone(), QoS::AtLeastOnce, retain, payload)
        {
            log::warn!("mqtt: dropping {size} byte(s) for {topic}: {err}");
        }
    }
}

/// Runs the MQTT event loop until the notifier is dropped. The loop
/// reconnects on its own as long as it keeps being polled.
fn drive(mut connection: Connection, client: Client, topic: String, running: Arc<AtomicBool>) {
    for event in connection.iter() {
        if !running.load(Ordering::Relaxed) {
            break;
        }
        match event {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                log::info!("mqtt connected");
                if let Err(err) = client.try_publish(
                    status_topic(&topic),
                    QoS::AtLeastOnce,
                    false,
                    PAYLOAD_ONLINE.as_bytes().to_vec(),
                ) {
                    log::warn!("mqtt: could not announce online: {err}");
                }
            }
            Ok(_) => {}
            Err(err) => {
                log::warn!("mqtt connection error: {err}");
                std::thread::sleep(RECONNECT_DELAY);
            }
        }
    }
    log::debug!("mqtt event loop stopped");
}

fn status_topic(prefix: &str) -> String {
    format!("{prefix}/error")
}

fn event_topic(prefix: &str, subject: &str) -> String {
    format!("{prefix}/{subject}")
}

fn snapshot_topic(prefix: &str, subject: &str) -> String {
    format!("{prefix}/snapshot/{subject}")
}

impl Notifier for MqttNotifier {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn send(&self, subject: &str, message: &str) {
        let topic = event_topic(&self.topic, subject);
        log::debug!("mqtt: publishing {message} to {topic}...");
        self.publish(topic, false, message.as_bytes().to_vec());
    }

    fn snapshot(&self, subject: &str, jpeg: &[u8]) {
        let topic = snapshot_topic(&self.topic, subject);
        log::debug!(
            "mqtt: snapshot ({:.2}kB) to {topic}...",
            jpeg.len() as f64 / 1024.0
        );
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        self.publish(topic.clone(), self.snapshot_retain, jpeg.to_vec());
        self.publish(
            format!("{topic}/timestamp"),
            self.snapshot_retain,
            now.to_string().into_bytes(),
        );
    }

    fn wants_snapshots(&self) -> bool {
        self.snapshots
    }
}

impl Drop for MqttNotifier {
    fn drop(&mut self) {
        log::info!("mqtt shutting down...");
        self.running.store(false, Ordering::Relaxed);
        let _ = self.client.try_disconnect();
        if let Some(handle) = self.connection.take() {
            let _ = handle.join();
        }
    }
}
