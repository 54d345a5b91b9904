//! Ban Policy
//!
//! Ban periods are never stored. They are folded from an output's full
//! offense history every time they are asked for, so a ban can always be
//! reproduced from the audit log alone.
//!
//! ## Policy
//!
//! | Offense            | Contribution                                            |
//! |--------------------|---------------------------------------------------------|
//! | `FailedToVerify`   | fixed `min_time_for_failed_to_verify`                   |
//! | `Cheating`         | fixed `min_time_for_cheating`                           |
//! | `RoundDisruption`  | `penalty_per_coin * COIN / value * weight * factor^(n-1)` |
//!
//! Disruptions are evaluated together at the most recent one: `value` is the
//! smallest value any of them disrupted, `weight` is the heaviest stage seen
//! so far and `n` is how many disruptions the output has. A single disruption above the large amount
//! threshold is forgiven, and outputs of known coinjoins are never banned
//! for disruptions. The reported period is the contribution that ends last.

use chrono::{DateTime, Duration, Utc};

use crate::prison::offense::{Offense, OffenseRecord, RoundDisruptionMethod};
use crate::types::Amount;

/// Window during which an output is refused by new rounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BanTimePeriod {
    pub start: DateTime<Utc>,
    pub duration: Duration,
}

impl BanTimePeriod {
    pub fn new(start: DateTime<Utc>, duration: Duration) -> Self {
        Self { start, duration }
    }

    /// Not banned
    pub fn zero() -> Self {
        Self::new(DateTime::<Utc>::UNIX_EPOCH, Duration::zero())
    }

    pub fn is_zero(&self) -> bool {
        self.duration <= Duration::zero()
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.start
            .checked_add_signed(self.duration)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Whether the ban is in force at `now`
    pub fn includes(&self, now: DateTime<Utc>) -> bool {
        !self.is_zero() && self.start <= now && now < self.end()
    }

    /// The harsher of two periods: later end wins, then longer duration
    fn worse(self, other: BanTimePeriod) -> BanTimePeriod {
        if other.is_zero() {
            return self;
        }
        if self.is_zero() {
            return other;
        }

        match other.end().cmp(&self.end()) {
            std::cmp::Ordering::Greater => other,
            std::cmp::Ordering::Less => self,
            std::cmp::Ordering::Equal if other.duration > self.duration => other,
            std::cmp::Ordering::Equal => self,
        }
    }
}

impl Default for BanTimePeriod {
    fn default() -> Self {
        Self::zero()
    }
}

/// Policy constants, built from [`crate::config::PrisonConfig`]
#[derive(Debug, Clone)]
pub struct BanPolicy {
    pub min_time_for_failed_to_verify: Duration,

    pub min_time_for_cheating: Duration,

    /// Ban for disrupting a round with exactly one coin
    pub penalty_per_coin: Duration,

    /// Above this value the first disruption is forgiven
    pub large_amount_threshold: Amount,

    pub did_not_confirm_weight: u32,
    pub did_not_sign_weight: u32,
    pub double_spent_weight: u32,

    /// Multiplier applied for every disruption after the first
    pub escalation_factor: u32,
}

impl Default for BanPolicy {
    fn default() -> Self {
        crate::config::PrisonConfig::default().to_policy()
    }
}

impl BanPolicy {
    pub fn stage_weight(&self, method: RoundDisruptionMethod) -> u32 {
        match method {
            RoundDisruptionMethod::DidNotConfirm => self.did_not_confirm_weight,
            RoundDisruptionMethod::DidNotSign => self.did_not_sign_weight,
            RoundDisruptionMethod::DoubleSpent => self.double_spent_weight,
        }
    }

    /// Fold an output's history into its current ban
    pub fn ban_time_period(&self, history: &[OffenseRecord], is_coinjoin: bool) -> BanTimePeriod {
        let fixed = history
            .iter()
            .filter_map(|record| {
                let duration = match record.offense {
                    Offense::FailedToVerify { .. } => self.min_time_for_failed_to_verify,
                    Offense::Cheating { .. } => self.min_time_for_cheating,
                    Offense::RoundDisruption { .. } => return None,
                };
                Some(BanTimePeriod::new(record.recorded_at, duration))
            })
            .fold(BanTimePeriod::zero(), BanTimePeriod::worse);

        fixed.worse(self.disruption_period(history, is_coinjoin))
    }

    fn disruption_period(&self, history: &[OffenseRecord], is_coinjoin: bool) -> BanTimePeriod {
        let disruptions: Vec<(DateTime<Utc>, RoundDisruptionMethod, Amount)> = history
            .iter()
            .filter_map(|record| match record.offense {
                Offense::RoundDisruption { method, value, .. } => {
                    Some((record.recorded_at, method, value))
                }
                _ => None,
            })
            .collect();

        let Some(&(last_at, _, last_value)) = disruptions.last() else {
            return BanTimePeriod::zero();
        };

        if is_coinjoin {
            return BanTimePeriod::zero();
        }

        if disruptions.len() == 1 && last_value > self.large_amount_threshold {
            return BanTimePeriod::zero();
        }

        // Every factor below is monotone in the history, so a longer history
        // never yields a shorter ban or an earlier end.
        let smallest_value = disruptions
            .iter()
            .map(|(_, _, value)| value.to_sat())
            .min()
            .unwrap_or(last_value.to_sat());

        let weight = disruptions
            .iter()
            .map(|(_, method, _)| self.stage_weight(*method))
            .max()
            .unwrap_or(1);

        let escalation = u32::try_from(disruptions.len() - 1)
            .ok()
            .and_then(|exp| u128::from(self.escalation_factor.max(1)).checked_pow(exp))
            .unwrap_or(u128::MAX);

        let per_coin = self.penalty_per_coin.num_nanoseconds().unwrap_or(i64::MAX).max(0) as u128;
        let value = u128::from(smallest_value.max(1));

        let nanos = (per_coin.saturating_mul(u128::from(Amount::COIN)) / value)
            .saturating_mul(u128::from(weight))
            .saturating_mul(escalation);

        let nanos = i64::try_from(nanos).unwrap_or(i64::MAX);
        BanTimePeriod::new(last_at, Duration::nanoseconds(nanos))
    }
}
