//! Audit drain worker
//!
//! Moves offense records from the audit channel into the configured sink.
//! On shutdown the channel is closed and whatever is still queued is flushed
//! before the task exits.

use anyhow::{Context, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::audit::{AuditReceiver, OffenseSink};
use crate::prison::OffenseRecord;

pub(crate) struct AuditWorker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<usize>,
}

impl AuditWorker {
    pub(crate) fn spawn(receiver: AuditReceiver<OffenseRecord>, sink: Arc<dyn OffenseSink>) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(receiver, sink, shutdown_rx));
        Self { shutdown, handle }
    }

    /// Ask the worker to flush and exit
    pub(crate) fn signal_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Wait for the worker to finish. Returns how many records it persisted.
    pub(crate) async fn join(self) -> Result<usize> {
        self.handle.await.context("Audit worker terminated abnormally")
    }
}

async fn run(
    mut receiver: AuditReceiver<OffenseRecord>,
    sink: Arc<dyn OffenseSink>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> usize {
    info!("Audit worker started");
    let mut backlog = Backlog::default();
    let mut persisted = 0;

    loop {
        tokio::select! {
            biased;
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Audit worker received shutdown signal");
                    break;
                }
            }
            record = receiver.recv() => match record {
                Some(record) => persisted += backlog.deliver(sink.as_ref(), record),
                None => {
                    persisted += backlog.finish(sink.as_ref());
                    info!(persisted = persisted, "Audit channel closed by all producers");
                    return persisted;
                }
            }
        }
    }

    persisted += drain(&mut receiver, sink.as_ref(), &mut backlog);
    info!(persisted = persisted, "Audit worker stopped");
    persisted
}

/// Close the channel and hand every queued record to the sink
pub(crate) fn flush(receiver: &mut AuditReceiver<OffenseRecord>, sink: &dyn OffenseSink) -> usize {
    drain(receiver, sink, &mut Backlog::default())
}

fn drain(
    receiver: &mut AuditReceiver<OffenseRecord>,
    sink: &dyn OffenseSink,
    backlog: &mut Backlog,
) -> usize {
    receiver.close();

    let mut flushed = 0;
    while let Some(record) = receiver.try_recv() {
        flushed += backlog.deliver(sink, record);
    }
    flushed += backlog.finish(sink);

    if flushed > 0 {
        debug!(flushed = flushed, "Flushed queued offense records");
    }
    flushed
}

/// Records the sink rejected, oldest first. Nothing newer reaches the sink
/// while an older record is still waiting here.
#[derive(Default)]
struct Backlog {
    records: VecDeque<OffenseRecord>,
}

impl Backlog {
    /// Queue `record` behind any rejected ones and persist as many as the
    /// sink accepts. Returns how many were persisted.
    fn deliver(&mut self, sink: &dyn OffenseSink, record: OffenseRecord) -> usize {
        self.records.push_back(record);
        self.retry(sink)
    }

    fn retry(&mut self, sink: &dyn OffenseSink) -> usize {
        let mut persisted = 0;

        while let Some(record) = self.records.front() {
            match sink.persist(record) {
                Ok(()) => {
                    self.records.pop_front();
                    persisted += 1;
                }
                Err(e) => {
                    error!(
                        outpoint = %record.outpoint,
                        offense = %record.offense,
                        backlog = self.records.len(),
                        "Failed to persist offense record, will retry: {:#}",
                        e
                    );
                    break;
                }
            }
        }

        persisted
    }

    /// Last attempt. Whatever the sink still rejects is lost.
    fn finish(&mut self, sink: &dyn OffenseSink) -> usize {
        let persisted = self.retry(sink);

        if !self.records.is_empty() {
            error!(
                lost = self.records.len(),
                "Offense records could not be persisted before shutdown"
            );
            self.records.clear();
        }

        persisted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{MemorySink, audit_channel};
    use crate::prison::Offense;
    use crate::types::{OutPoint, RoundId};
    use std::time::Duration;

    fn record() -> OffenseRecord {
        OffenseRecord::new(
            OutPoint::random(),
            Offense::Cheating {
                round_id: RoundId::random(),
            },
        )
    }

    struct FailingSink;

    /// Rejects the first `failures` calls, then stores records
    struct FlakySink {
        failures: std::sync::atomic::AtomicUsize,
        inner: MemorySink,
    }

    impl FlakySink {
        fn new(failures: usize) -> Self {
            Self {
                failures: std::sync::atomic::AtomicUsize::new(failures),
                inner: MemorySink::new(),
            }
        }
    }

    impl OffenseSink for FlakySink {
        fn persist(&self, record: &OffenseRecord) -> Result<()> {
            use std::sync::atomic::Ordering;
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(anyhow::anyhow!("storage unavailable"));
            }
            self.inner.persist(record)
        }
    }

    impl OffenseSink for FailingSink {
        fn persist(&self, _record: &OffenseRecord) -> Result<()> {
            Err(anyhow::anyhow!("disk full"))
        }
    }

    #[tokio::test]
    async fn test_worker_forwards_then_flushes() {
        let (tx, rx) = audit_channel();
        let sink = Arc::new(MemorySink::new());
        let worker = AuditWorker::spawn(rx, sink.clone());

        let expected: Vec<OffenseRecord> = (0..10).map(|_| record()).collect();
        for r in &expected {
            tx.publish(r.clone());
        }

        worker.signal_shutdown();
        let persisted = tokio::time::timeout(Duration::from_secs(1), worker.join())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(persisted, 10);
        assert_eq!(sink.records(), expected);
        assert!(!tx.publish(record()));
    }

    #[tokio::test]
    async fn test_worker_exits_when_producers_are_gone() {
        let (tx, rx) = audit_channel();
        let sink = Arc::new(MemorySink::new());
        let worker = AuditWorker::spawn(rx, sink.clone());

        tx.publish(record());
        drop(tx);

        let persisted = worker.join().await.unwrap();
        assert_eq!(persisted, 1);
    }

    #[tokio::test]
    async fn test_sink_errors_do_not_stop_worker() {
        let (tx, mut rx) = audit_channel();
        tx.publish(record());
        tx.publish(record());

        assert_eq!(flush(&mut rx, &FailingSink), 0);
        assert!(rx.is_empty());
    }

    #[test]
    fn test_rejected_records_are_retried_in_order() {
        let (tx, mut rx) = audit_channel();
        let expected: Vec<OffenseRecord> = (0..3).map(|_| record()).collect();
        for r in &expected {
            tx.publish(r.clone());
        }

        let sink = FlakySink::new(2);
        assert_eq!(flush(&mut rx, &sink), 3);
        assert_eq!(sink.inner.records(), expected);
    }

    #[tokio::test]
    async fn test_worker_retries_after_sink_recovers() {
        let (tx, rx) = audit_channel();
        let sink = Arc::new(FlakySink::new(1));
        let worker = AuditWorker::spawn(rx, sink.clone());

        let expected: Vec<OffenseRecord> = (0..4).map(|_| record()).collect();
        for r in &expected {
            tx.publish(r.clone());
        }
        drop(tx);

        assert_eq!(worker.join().await.unwrap(), 4);
        assert_eq!(sink.inner.records(), expected);
    }
}
