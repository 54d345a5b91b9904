//! Unbounded audit queue
//!
//! Multiple producers, one consumer, FIFO per producer. Producers never wait.
//! The receiver exposes how many published items have not been drained yet.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tracing::warn;

/// Create a connected sender/receiver pair
pub fn audit_channel<T>() -> (AuditSender<T>, AuditReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));

    (
        AuditSender {
            tx,
            pending: pending.clone(),
        },
        AuditReceiver { rx, pending },
    )
}

/// Producer half, cheap to clone
#[derive(Debug)]
pub struct AuditSender<T> {
    tx: mpsc::UnboundedSender<T>,
    pending: Arc<AtomicUsize>,
}

impl<T> Clone for AuditSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            pending: self.pending.clone(),
        }
    }
}

impl<T> AuditSender<T> {
    /// Enqueue an item. Returns `false` if the consumer has gone away.
    pub fn publish(&self, item: T) -> bool {
        // Counted before sending; the receiver decrements on receipt.
        self.pending.fetch_add(1, Ordering::SeqCst);
        match self.tx.send(item) {
            Ok(()) => true,
            Err(_) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                warn!("Audit consumer closed, record was not delivered");
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Items published but not yet drained
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

/// Consumer half
#[derive(Debug)]
pub struct AuditReceiver<T> {
    rx: mpsc::UnboundedReceiver<T>,
    pending: Arc<AtomicUsize>,
}

impl<T> AuditReceiver<T> {
    /// Wait for the next item. `None` once every sender is dropped and the queue is empty.
    pub async fn recv(&mut self) -> Option<T> {
        let item = self.rx.recv().await;
        if item.is_some() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        item
    }

    /// Take the next item if one is already queued
    pub fn try_recv(&mut self) -> Option<T> {
        let item = self.rx.try_recv().ok();
        if item.is_some() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        item
    }

    pub fn len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting new items. Already queued items can still be drained.
    pub fn close(&mut self) {
        self.rx.close();
    }
}
