//! Offenses Recorded Against Outputs
//!
//! An offense is a one-shot fact: once recorded it is never modified.
//! Each record is published to the audit channel exactly once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{Amount, OutPoint, RoundId};

/// Stage of the round at which a registered participant walked away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundDisruptionMethod {
    /// Registered but never reconfirmed the input
    DidNotConfirm,

    /// Reconfirmed but never provided a signature
    DidNotSign,

    /// Spent the input elsewhere while the round was running
    DoubleSpent,
}

impl RoundDisruptionMethod {
    pub fn description(&self) -> &'static str {
        match self {
            RoundDisruptionMethod::DidNotConfirm => "Did not reconfirm the input",
            RoundDisruptionMethod::DidNotSign => "Did not sign the coinjoin",
            RoundDisruptionMethod::DoubleSpent => "Double spent the input",
        }
    }
}

/// Misbehavior attributed to an output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Offense {
    /// Ownership or credential verification failed
    FailedToVerify { round_id: RoundId },

    /// Participant registered and then disrupted the round
    RoundDisruption {
        round_id: RoundId,
        method: RoundDisruptionMethod,
        value: Amount,
    },

    /// Active attempt to subvert protocol guarantees
    Cheating { round_id: RoundId },
}

impl Offense {
    pub fn round_id(&self) -> RoundId {
        match self {
            Offense::FailedToVerify { round_id }
            | Offense::RoundDisruption { round_id, .. }
            | Offense::Cheating { round_id } => *round_id,
        }
    }

    /// Short stable name, used as a log field
    pub fn kind(&self) -> &'static str {
        match self {
            Offense::FailedToVerify { .. } => "failed_to_verify",
            Offense::RoundDisruption { .. } => "round_disruption",
            Offense::Cheating { .. } => "cheating",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Offense::FailedToVerify { .. } => "Failed ownership or credential verification",
            Offense::RoundDisruption { method, .. } => method.description(),
            Offense::Cheating { .. } => "Attempted to cheat the protocol",
        }
    }

    pub fn is_disruption(&self) -> bool {
        matches!(self, Offense::RoundDisruption { .. })
    }
}

impl fmt::Display for Offense {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Offense::RoundDisruption { method, value, .. } => {
                write!(f, "{} ({:?}, {})", self.kind(), method, value)
            }
            _ => f.write_str(self.kind()),
        }
    }
}

/// An offense bound to the output it was recorded against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffenseRecord {
    pub outpoint: OutPoint,

    pub offense: Offense,

    /// When the coordinator recorded the offense
    pub recorded_at: DateTime<Utc>,
}

impl OffenseRecord {
    pub fn new(outpoint: OutPoint, offense: Offense) -> Self {
        Self::at(outpoint, offense, Utc::now())
    }

    pub fn at(outpoint: OutPoint, offense: Offense, recorded_at: DateTime<Utc>) -> Self {
        Self {
            outpoint,
            offense,
            recorded_at,
        }
    }
}
