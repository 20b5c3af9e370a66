//! Live consumers of the processed frame stream.
//!
//! Observers subscribe to the dispatcher's observer bus like any other
//! consumer and run on their own threads; a stalled viewer only ever loses
//! frames, it never slows capture down.

mod framebuffer;
mod reserver;

pub use framebuffer::{to_bgra, FramebufferObserver, FramebufferSettings};
pub use reserver::{Reserver, ReserverSettings};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Control side of a running observer.
pub struct ObserverHandle {
    name: &'static str,
    addr: Option<SocketAddr>,
    shutdown: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl ObserverHandle {
    fn new(name: &'static str, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            name,
            addr: None,
            shutdown,
            threads: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Bound address, for observers that listen.
    pub fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                log::error!("observer {}: thread panicked", self.name);
            }
        }
    }
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}
