//! Per-run event log with live fan-out.
//!
//! One bus exists per run. The log is append-only and canonical; a
//! subscriber gets the full history as of subscribe time plus every
//! later append through an unbounded channel of its own. A subscriber
//! that stops consuming affects neither the log nor other subscribers.

use tokio::sync::{Mutex, mpsc};

use crate::events::RunEvent;

type EventSender = mpsc::UnboundedSender<RunEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<RunEvent>;

#[derive(Debug, Default)]
pub struct EventBus {
    inner: Mutex<BusInner>,
}

#[derive(Debug, Default)]
struct BusInner {
    log: Vec<RunEvent>,
    subscribers: Vec<EventSender>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the log and wake every live subscriber. Subscribers
    /// whose receiver has been dropped are pruned here.
    pub async fn append(&self, event: RunEvent) {
        let mut inner = self.inner.lock().await;
        inner.log.push(event.clone());
        inner
            .subscribers
            .retain(|sender| sender.send(event.clone()).is_ok());
    }

    /// Snapshot of the full log in append order.
    pub async fn snapshot(&self) -> Vec<RunEvent> {
        self.inner.lock().await.log.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.log.len()
    }

    /// Register a subscriber. The history snapshot and the channel
    /// registration happen under one lock, so the receiver sees every
    /// event exactly once: the snapshot first, then the live tail.
    pub async fn subscribe(&self) -> (Vec<RunEvent>, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().await;
        let history = inner.log.clone();
        inner.subscribers.push(tx);
        (history, rx)
    }
}
