//! Destinations for drained offense records
//!
//! Durable storage lives outside this crate; it plugs in through [`OffenseSink`].

use anyhow::Result;
use std::sync::Mutex;
use tracing::info;

use crate::prison::OffenseRecord;

/// Receives every offense record drained from the audit channel, in order
pub trait OffenseSink: Send + Sync {
    fn persist(&self, record: &OffenseRecord) -> Result<()>;
}

/// Writes each record to the log. Default sink of the coordinator.
#[derive(Debug, Default)]
pub struct TracingSink;

impl OffenseSink for TracingSink {
    fn persist(&self, record: &OffenseRecord) -> Result<()> {
        info!(
            outpoint = %record.outpoint,
            offense = %record.offense.kind(),
            round = %record.offense.round_id(),
            recorded_at = %record.recorded_at,
            "AUDIT: offense recorded"
        );
        Ok(())
    }
}

/// Keeps drained records in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<OffenseRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<OffenseRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OffenseSink for MemorySink {
    fn persist(&self, record: &OffenseRecord) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| anyhow::anyhow!("Memory sink lock poisoned"))?
            .push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prison::Offense;
    use crate::types::{OutPoint, RoundId};

    #[test]
    fn test_memory_sink_keeps_order() {
        let sink = MemorySink::new();
        let outpoint = OutPoint::random();

        for _ in 0..3 {
            let record = OffenseRecord::new(
                outpoint,
                Offense::Cheating {
                    round_id: RoundId::random(),
                },
            );
            sink.persist(&record).unwrap();
        }

        assert_eq!(sink.len(), 3);
        assert!(sink.records().iter().all(|r| r.outpoint == outpoint));
    }

    #[test]
    fn test_tracing_sink_accepts_records() {
        let record = OffenseRecord::new(
            OutPoint::random(),
            Offense::FailedToVerify {
                round_id: RoundId::random(),
            },
        );
        assert!(TracingSink.persist(&record).is_ok());
    }
}
