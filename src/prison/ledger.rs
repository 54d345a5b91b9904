//! Prison - Misbehavior Ledger
//!
//! Records offenses per output and answers ban queries from the round engine.
//! Every recorded offense is appended to the output's history and published
//! on the audit channel while the output's entry is locked, so the audit
//! stream sees each output's offenses in history order.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::audit::{AuditReceiver, AuditSender, audit_channel};
use crate::prison::{
    BanPolicy, BanTimePeriod, CoinJoinRegistry, Offense, OffenseRecord, RoundDisruptionMethod,
};
use crate::types::{Amount, OutPoint, RoundId};

/// Offense ledger and ban oracle
pub struct Prison {
    policy: BanPolicy,

    /// Identifies outputs of completed coinjoins
    coinjoins: Arc<dyn CoinJoinRegistry>,

    /// Append-only offense history per output
    offenders: DashMap<OutPoint, Vec<OffenseRecord>>,

    /// Every recorded offense goes here
    audit: AuditSender<OffenseRecord>,
}

impl Prison {
    /// Create a prison and the receiving end of its audit channel
    pub fn new(
        policy: BanPolicy,
        coinjoins: Arc<dyn CoinJoinRegistry>,
    ) -> (Self, AuditReceiver<OffenseRecord>) {
        let (audit, receiver) = audit_channel();

        let prison = Self {
            policy,
            coinjoins,
            offenders: DashMap::new(),
            audit,
        };

        (prison, receiver)
    }

    pub fn record_failed_verification(&self, outpoint: OutPoint, round_id: RoundId) -> OffenseRecord {
        self.record(outpoint, Offense::FailedToVerify { round_id })
    }

    pub fn record_failed_to_confirm(
        &self,
        outpoint: OutPoint,
        value: Amount,
        round_id: RoundId,
    ) -> OffenseRecord {
        self.record_disruption(outpoint, RoundDisruptionMethod::DidNotConfirm, value, round_id)
    }

    pub fn record_failed_to_sign(
        &self,
        outpoint: OutPoint,
        value: Amount,
        round_id: RoundId,
    ) -> OffenseRecord {
        self.record_disruption(outpoint, RoundDisruptionMethod::DidNotSign, value, round_id)
    }

    pub fn record_double_spent(
        &self,
        outpoint: OutPoint,
        value: Amount,
        round_id: RoundId,
    ) -> OffenseRecord {
        self.record_disruption(outpoint, RoundDisruptionMethod::DoubleSpent, value, round_id)
    }

    pub fn record_cheating_detected(&self, outpoint: OutPoint, round_id: RoundId) -> OffenseRecord {
        self.record(outpoint, Offense::Cheating { round_id })
    }

    fn record_disruption(
        &self,
        outpoint: OutPoint,
        method: RoundDisruptionMethod,
        value: Amount,
        round_id: RoundId,
    ) -> OffenseRecord {
        self.record(
            outpoint,
            Offense::RoundDisruption {
                round_id,
                method,
                value,
            },
        )
    }

    fn record(&self, outpoint: OutPoint, offense: Offense) -> OffenseRecord {
        let (record, count) = {
            let mut history = self.offenders.entry(outpoint).or_default();
            let record = OffenseRecord::new(outpoint, offense);
            history.push(record.clone());
            self.audit.publish(record.clone());
            (record, history.len())
        };

        info!(
            outpoint = %outpoint,
            round = %offense.round_id(),
            offense = %offense,
            offenses = count,
            "Recorded offense"
        );

        record
    }

    /// Current ban of an output. Zero for outputs without history.
    pub fn get_ban_time_period(&self, outpoint: &OutPoint) -> BanTimePeriod {
        let history = self.history(outpoint);
        if history.is_empty() {
            return BanTimePeriod::zero();
        }

        let is_coinjoin = self.coinjoins.contains(&outpoint.txid);
        self.policy.ban_time_period(&history, is_coinjoin)
    }

    /// Whether the round engine should refuse `outpoint` at `now`
    pub fn is_banned(&self, outpoint: &OutPoint, now: DateTime<Utc>) -> bool {
        self.get_ban_time_period(outpoint).includes(now)
    }

    /// Snapshot of an output's offenses in recording order
    pub fn history(&self, outpoint: &OutPoint) -> Vec<OffenseRecord> {
        self.offenders
            .get(outpoint)
            .map(|history| history.clone())
            .unwrap_or_default()
    }

    /// Outputs with at least one recorded offense
    pub fn offender_count(&self) -> usize {
        self.offenders.len()
    }

    /// Outputs banned at `now`, sorted
    pub fn banned_outpoints(&self, now: DateTime<Utc>) -> Vec<OutPoint> {
        let outpoints: Vec<OutPoint> = self.offenders.iter().map(|entry| *entry.key()).collect();

        let mut banned: Vec<OutPoint> = outpoints
            .into_iter()
            .filter(|outpoint| self.is_banned(outpoint, now))
            .collect();
        banned.sort();
        banned
    }

    /// Replay previously persisted records into the history without
    /// publishing them again. Returns how many records were restored.
    pub fn restore(&self, records: impl IntoIterator<Item = OffenseRecord>) -> usize {
        let mut restored = 0;

        for record in records {
            self.offenders.entry(record.outpoint).or_default().push(record);
            restored += 1;
        }

        debug!(
            restored = restored,
            offenders = self.offenders.len(),
            "Restored offense history"
        );
        restored
    }

    /// Records published but not yet drained by the audit consumer
    pub fn pending_audit(&self) -> usize {
        self.audit.pending()
    }

    pub fn policy(&self) -> &BanPolicy {
        &self.policy
    }

    pub(crate) fn warn_if_audit_closed(&self) {
        if self.audit.is_closed() {
            warn!(
                offenders = self.offenders.len(),
                "Audit channel is closed, new offenses will not reach storage"
            );
        }
    }
}

impl std::fmt::Debug for Prison {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prison")
            .field("policy", &self.policy)
            .field("offenders", &self.offenders.len())
            .field("pending_audit", &self.audit.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prison::{CoinJoinIdStore, NoCoinJoins};
    use chrono::Duration;

    fn prison() -> (Prison, AuditReceiver<OffenseRecord>) {
        Prison::new(BanPolicy::default(), Arc::new(NoCoinJoins))
    }

    #[test]
    fn test_unknown_output_is_not_banned() {
        let (prison, _rx) = prison();
        let outpoint = OutPoint::random();

        assert!(prison.get_ban_time_period(&outpoint).is_zero());
        assert!(!prison.is_banned(&outpoint, Utc::now()));
        assert!(prison.history(&outpoint).is_empty());
        assert_eq!(prison.offender_count(), 0);
    }

    #[test]
    fn test_record_appends_and_publishes() {
        let (prison, mut rx) = prison();
        let outpoint = OutPoint::random();
        let round_id = RoundId::random();

        let first = prison.record_failed_verification(outpoint, round_id);
        let second = prison.record_double_spent(outpoint, Amount::from_btc(0.1), round_id);

        assert_eq!(prison.history(&outpoint), vec![first.clone(), second.clone()]);
        assert_eq!(rx.len(), 2);
        assert_eq!(prison.pending_audit(), 2);
        assert_eq!(rx.try_recv(), Some(first));
        assert_eq!(rx.try_recv(), Some(second));
        assert_eq!(prison.pending_audit(), 0);
    }

    #[test]
    fn test_banned_now() {
        let (prison, _rx) = prison();
        let outpoint = OutPoint::random();
        prison.record_cheating_detected(outpoint, RoundId::random());

        let now = Utc::now();
        assert!(prison.is_banned(&outpoint, now));
        assert!(!prison.is_banned(&outpoint, now + Duration::days(2)));
        assert_eq!(prison.banned_outpoints(now), vec![outpoint]);
    }

    #[test]
    fn test_coinjoin_registry_is_consulted() {
        let coinjoin = OutPoint::random();
        let store = Arc::new(CoinJoinIdStore::from_ids([coinjoin.txid]));
        let (prison, _rx) = Prison::new(BanPolicy::default(), store);

        prison.record_failed_to_sign(coinjoin, Amount::from_btc(0.01), RoundId::random());
        prison.record_failed_to_sign(coinjoin, Amount::from_btc(0.01), RoundId::random());

        assert!(prison.get_ban_time_period(&coinjoin).is_zero());
        assert_eq!(prison.history(&coinjoin).len(), 2);
    }

    #[test]
    fn test_restore_does_not_republish() {
        let (source, mut source_rx) = prison();
        let outpoint = OutPoint::random();
        source.record_failed_to_confirm(outpoint, Amount::from_btc(0.5), RoundId::random());
        source.record_failed_to_sign(outpoint, Amount::from_btc(0.5), RoundId::random());

        let mut persisted = Vec::new();
        while let Some(record) = source_rx.try_recv() {
            persisted.push(record);
        }

        let (restored, restored_rx) = prison();
        assert_eq!(restored.restore(persisted), 2);
        assert!(restored_rx.is_empty());
        assert_eq!(
            restored.get_ban_time_period(&outpoint),
            source.get_ban_time_period(&outpoint)
        );
    }

    #[test]
    fn test_records_survive_closed_audit_channel() {
        let (prison, rx) = prison();
        drop(rx);

        let outpoint = OutPoint::random();
        prison.record_cheating_detected(outpoint, RoundId::random());
        prison.warn_if_audit_closed();

        assert_eq!(prison.history(&outpoint).len(), 1);
        assert_eq!(prison.pending_audit(), 0);
    }

    #[test]
    fn test_concurrent_recording_on_distinct_outputs() {
        let (prison, mut rx) = prison();
        let outpoints: Vec<OutPoint> = (0..8).map(|_| OutPoint::random()).collect();

        std::thread::scope(|scope| {
            for outpoint in &outpoints {
                let prison = &prison;
                scope.spawn(move || {
                    for _ in 0..25 {
                        prison.record_failed_to_confirm(
                            *outpoint,
                            Amount::from_btc(0.3),
                            RoundId::random(),
                        );
                    }
                });
            }
        });

        for outpoint in &outpoints {
            let history = prison.history(outpoint);
            assert_eq!(history.len(), 25);
            assert!(history.iter().all(|r| r.outpoint == *outpoint));
        }
        assert_eq!(rx.len(), 200);

        let mut per_output: std::collections::HashMap<OutPoint, Vec<OffenseRecord>> =
            std::collections::HashMap::new();
        while let Some(record) = rx.try_recv() {
            per_output.entry(record.outpoint).or_default().push(record);
        }
        for outpoint in &outpoints {
            assert_eq!(per_output[outpoint], prison.history(outpoint));
        }
    }
}
