//! MJPEG re-streaming of what the detector sees.
//!
//! `GET /<anything>.jpg` returns the latest frame as a single JPEG; any other
//! path streams `multipart/x-mixed-replace` JPEG parts until the client goes
//! away. At most `max_clients` connections are served at once; the rest get
//! a 503.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::ObserverHandle;
use crate::archive::{encode_jpeg, DEFAULT_JPEG_QUALITY};
use crate::bus::{FrameBus, QueueEndpoint};
use crate::metrics::LoopTimer;
use crate::slot::FrameSlot;

const MAX_REQUEST_BYTES: usize = 8 * 1024;
const BOUNDARY: &str = "jpgboundary";
const QUEUE_CAPACITY: usize = 2;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);
const BUSY_REQUEST_TIMEOUT: Duration = Duration::from_millis(200);
pub const DEFAULT_MAX_CLIENTS: usize = 8;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ReserverSettings {
    pub listen: String,
    pub fps: f64,
    pub jpeg_quality: u8,
    /// Concurrent connections served; each one holds a thread.
    pub max_clients: usize,
}

impl Default for ReserverSettings {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8888".to_string(),
            fps: 10.0,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            max_clients: DEFAULT_MAX_CLIENTS,
        }
    }
}

pub struct Reserver {
    settings: ReserverSettings,
}

/// State shared by the accept loop and every client thread.
struct Shared {
    settings: ReserverSettings,
    latest: FrameSlot,
    shutdown: Arc<AtomicBool>,
    clients: AtomicUsize,
}

/// One served connection; released when the client thread ends.
struct ClientSlot(Arc<Shared>);

impl Drop for ClientSlot {
    fn drop(&mut self) {
        self.0.clients.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Reserver {
    pub fn new(settings: ReserverSettings) -> Self {
        Self { settings }
    }

    /// Bind, subscribe to `bus` and start serving.
    pub fn spawn(self, bus: &FrameBus) -> Result<ObserverHandle> {
        let configured: SocketAddr = self
            .settings
            .listen
            .parse()
            .with_context(|| format!("invalid reserver listen address '{}'", self.settings.listen))?;
        let listener = TcpListener::bind(configured)
            .with_context(|| format!("bind reserver on {configured}"))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;
        log::info!("reserver: listening on {addr}");

        let shutdown = Arc::new(AtomicBool::new(false));
        let shared = Arc::new(Shared {
            settings: self.settings,
            latest: FrameSlot::new(),
            shutdown: shutdown.clone(),
            clients: AtomicUsize::new(0),
        });
        let endpoint = bus.subscribe_bounded(QUEUE_CAPACITY);

        let mut handle = ObserverHandle::new("reserver", shutdown);
        handle.addr = Some(addr);
        handle.threads.push(
            std::thread::Builder::new()
                .name("reserver-pump".to_string())
                .spawn({
                    let shared = shared.clone();
                    move || pump(endpoint, &shared)
                })?,
        );
        handle.threads.push(
            std::thread::Builder::new()
                .name("reserver".to_string())
                .spawn(move || {
                    if let Err(err) = accept_loop(listener, shared) {
                        log::error!("reserver stopped: {err:#}");
                    }
                })?,
        );
        Ok(handle)
    }
}

/// Keep the shared slot at the newest frame the bus delivered.
fn pump(endpoint: QueueEndpoint, shared: &Shared) {
    while !shared.shutdown.load(Ordering::SeqCst) {
        if let Some(frame) = endpoint.latest_timeout(Duration::from_millis(100)) {
            shared.latest.publish(frame);
        }
    }
    if endpoint.dropped() > 0 {
        log::debug!("reserver: {} frame(s) skipped", endpoint.dropped());
    }
}

fn accept_loop(listener: TcpListener, shared: Arc<Shared>) -> Result<()> {
    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                if shared.clients.load(Ordering::SeqCst) >= shared.settings.max_clients {
                    log::warn!(
                        "reserver: turning away {peer}, {} client(s) already connected",
                        shared.settings.max_clients
                    );
                    if let Err(err) = turn_away(stream) {
                        log::debug!("reserver: client {peer}: {err:#}");
                    }
                    continue;
                }
                log::debug!("reserver: connection from {peer}...");
                shared.clients.fetch_add(1, Ordering::SeqCst);
                let slot = ClientSlot(shared.clone());
                let spawned = std::thread::Builder::new()
                    .name("reserver-client".to_string())
                    .spawn(move || {
                        if let Err(err) = handle_client(stream, &slot.0) {
                            log::debug!("reserver: client {peer}: {err:#}");
                        }
                    });
                if let Err(err) = spawned {
                    log::warn!("reserver: cannot serve {peer}: {err}");
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

/// Answer 503 on the accept thread. The request is read first so closing
/// does not reset the connection before the client sees the answer.
fn turn_away(mut stream: TcpStream) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_write_timeout(Some(BUSY_REQUEST_TIMEOUT))?;
    let _ = read_request(&mut stream, BUSY_REQUEST_TIMEOUT);
    write_response(&mut stream, 503, "text/plain", b"too many clients")
}

fn handle_client(mut stream: TcpStream, shared: &Shared) -> Result<()> {
    stream.set_nonblocking(false)?;
    let (method, path) = read_request(&mut stream, REQUEST_TIMEOUT)?;
    if method != "GET" {
        return write_response(&mut stream, 405, "text/plain", b"method not allowed");
    }
    if path.ends_with(".jpg") {
        serve_jpeg(&mut stream, shared)
    } else {
        serve_mjpeg(&mut stream, shared)
    }
}

fn serve_jpeg(stream: &mut TcpStream, shared: &Shared) -> Result<()> {
    let Some(frame) = shared.latest.acquire() else {
        log::warn!("reserver: frame not ready");
        return write_response(stream, 503, "text/plain", b"frame not ready");
    };
    let jpeg = encode_jpeg(&frame, shared.settings.jpeg_quality)?;
    write_response(stream, 200, "image/jpeg", &jpeg)
}

fn serve_mjpeg(stream: &mut TcpStream, shared: &Shared) -> Result<()> {
    let peer = stream.peer_addr()?;
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary={BOUNDARY}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n"
    );
    stream.write_all(header.as_bytes())?;
    log::info!("reserver: serving stream to client {peer}");

    let mut timer = LoopTimer::new(format!("reserver {peer}"), shared.settings.fps, 0);
    let mut last_sent = None;
    while !shared.shutdown.load(Ordering::SeqCst) {
        timer.start();
        let frame = shared
            .latest
            .acquire()
            .filter(|frame| last_sent != Some(frame.sequence()));
        if let Some(frame) = frame {
            let jpeg = encode_jpeg(&frame, shared.settings.jpeg_quality)?;
            let part = format!(
                "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
                jpeg.len()
            );
            let written = stream
                .write_all(part.as_bytes())
                .and_then(|_| stream.write_all(&jpeg))
                .and_then(|_| stream.write_all(b"\r\n"));
            if written.is_err() {
                log::info!("reserver: client {peer} disconnected");
                return Ok(());
            }
            last_sent = Some(frame.sequence());
        }
        timer.end();
    }
    Ok(())
}

/// Request line only; headers are read and discarded.
fn read_request(stream: &mut TcpStream, timeout: Duration) -> Result<(String, String)> {
    stream.set_read_timeout(Some(timeout))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let request_line = text.lines().next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path);
    Ok((method.to_string(), path.to_string()))
}

fn write_response(stream: &mut TcpStream, status: u16, content_type: &str, body: &[u8]) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}
