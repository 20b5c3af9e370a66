//! Fan-out of one producer's frames to independent consumers.
//!
//! Two endpoint flavours exist:
//! - `SlotEndpoint`: a private `FrameSlot`; the consumer sees only the newest frame.
//! - `QueueEndpoint`: a bounded queue for consumers that drain on their own
//!   thread. When the queue is full the publisher evicts the oldest frame
//!   instead of waiting, so a stalled consumer never stalls the producer.
//!
//! Endpoints remove themselves from the bus when dropped.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use crate::frame::Frame;
use crate::slot::FrameSlot;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EndpointId(u64);

enum Sink {
    Slot(Arc<FrameSlot>),
    Queue {
        tx: Sender<Frame>,
        // Publisher-side handle used to evict the oldest frame.
        evict: Receiver<Frame>,
        dropped: Arc<AtomicU64>,
    },
}

struct Subscriber {
    id: EndpointId,
    sink: Sink,
}

#[derive(Default)]
struct BusInner {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl BusInner {
    fn lock(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, id: EndpointId) {
        self.lock().retain(|sub| sub.id != id);
    }
}

/// Cloneable handle to a set of subscribers.
#[derive(Clone, Default)]
pub struct FrameBus {
    inner: Arc<BusInner>,
}

impl FrameBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> EndpointId {
        EndpointId(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Latest-frame endpoint for an in-process consumer.
    pub fn subscribe(&self) -> SlotEndpoint {
        let id = self.next_id();
        let slot = Arc::new(FrameSlot::new());
        self.inner.lock().push(Subscriber {
            id,
            sink: Sink::Slot(slot.clone()),
        });
        SlotEndpoint {
            id,
            slot,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Bounded drop-oldest endpoint. A capacity of zero is treated as one.
    pub fn subscribe_bounded(&self, capacity: usize) -> QueueEndpoint {
        let id = self.next_id();
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        self.inner.lock().push(Subscriber {
            id,
            sink: Sink::Queue {
                tx,
                evict: rx.clone(),
                dropped: dropped.clone(),
            },
        });
        QueueEndpoint {
            id,
            rx,
            dropped,
            bus: Arc::downgrade(&self.inner),
        }
    }

    pub fn unsubscribe(&self, id: EndpointId) {
        self.inner.remove(id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().len()
    }

    /// Hand `frame` to every subscriber. Never blocks on a consumer.
    pub fn publish(&self, frame: &Frame) {
        let subscribers = self.inner.lock();
        for sub in subscribers.iter() {
            match &sub.sink {
                Sink::Slot(slot) => slot.publish(frame.clone()),
                Sink::Queue { tx, evict, dropped } => {
                    push_drop_oldest(tx, evict, dropped, frame.clone());
                }
            }
        }
    }
}

fn push_drop_oldest(tx: &Sender<Frame>, evict: &Receiver<Frame>, dropped: &AtomicU64, frame: Frame) {
    let mut pending = frame;
    // The consumer may drain concurrently, so a second attempt can still
    // find the queue full; keep evicting until the frame fits.
    loop {
        match tx.try_send(pending) {
            Ok(()) => return,
            Err(TrySendError::Full(frame)) => {
                if evict.try_recv().is_ok() {
                    dropped.fetch_add(1, Ordering::Relaxed);
                }
                pending = frame;
            }
            Err(TrySendError::Disconnected(_)) => return,
        }
    }
}

// ----------------------------------------------------------------------------
// Endpoints
// ----------------------------------------------------------------------------

pub struct SlotEndpoint {
    id: EndpointId,
    slot: Arc<FrameSlot>,
    bus: Weak<BusInner>,
}

impl SlotEndpoint {
    pub fn id(&self) -> EndpointId {
        self.id
    }

    pub fn acquire(&self) -> Option<Frame> {
        self.slot.acquire()
    }

    pub fn is_ready(&self) -> bool {
        self.slot.is_ready()
    }

    pub fn is_stale(&self) -> bool {
        self.slot.is_stale()
    }
}

impl Drop for SlotEndpoint {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}

pub struct QueueEndpoint {
    id: EndpointId,
    rx: Receiver<Frame>,
    dropped: Arc<AtomicU64>,
    bus: Weak<BusInner>,
}

impl QueueEndpoint {
    pub fn id(&self) -> EndpointId {
        self.id
    }

    /// Oldest queued frame, waiting up to `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Frame> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Some(frame),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Drain everything queued and return only the newest frame.
    pub fn latest(&self) -> Option<Frame> {
        self.rx.try_iter().last()
    }

    /// Wait up to `timeout` for at least one frame, then skip to the newest.
    pub fn latest_timeout(&self, timeout: Duration) -> Option<Frame> {
        let first = self.recv_timeout(timeout)?;
        Some(self.latest().unwrap_or(first))
    }

    pub fn queued(&self) -> usize {
        self.rx.len()
    }

    /// Frames evicted because this consumer fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for QueueEndpoint {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}
