//! Bounded dispatch queue between the listener and the worker pool.
//!
//! A bounded `tokio` mpsc channel whose receiving half is shared by all
//! workers. A full queue suspends the sender until a worker frees a slot;
//! nothing is dropped. The queue closes once every sender is gone, and
//! workers keep receiving until it is both closed and empty.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};

use crate::models::RawDatagram;

/// Default queue capacity.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Producer half, owned by the listener.
#[derive(Debug, Clone)]
pub struct QueueSender {
    tx: mpsc::Sender<RawDatagram>,
}

/// Consumer half, cloned into every worker.
#[derive(Debug, Clone)]
pub struct QueueReceiver {
    rx: Arc<Mutex<mpsc::Receiver<RawDatagram>>>,
}

/// Create a queue holding at most `capacity` datagrams.
///
/// # Panics
///
/// Panics if capacity is zero.
#[must_use]
pub fn dispatch_queue(capacity: usize) -> (QueueSender, QueueReceiver) {
    assert!(capacity > 0, "capacity must be positive");

    let (tx, rx) = mpsc::channel(capacity);
    (
        QueueSender { tx },
        QueueReceiver {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

impl QueueSender {
    /// Enqueue a datagram, waiting for space if the queue is full.
    ///
    /// Hands the datagram back if every receiver is gone.
    pub async fn push(&self, datagram: RawDatagram) -> Result<(), RawDatagram> {
        self.tx.send(datagram).await.map_err(|e| e.0)
    }

    /// Free slots right now.
    #[must_use]
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }
}

impl QueueReceiver {
    /// Wait for the next datagram. `None` once the queue is closed and drained.
    pub async fn pull(&self) -> Option<RawDatagram> {
        // Only one idle worker waits inside recv at a time; the rest queue on the lock
        self.rx.lock().await.recv().await
    }
}
