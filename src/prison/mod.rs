//! Prison: Misbehavior Ledger for Coinjoin Rounds
//!
//! Tracks offenses per output and derives time-bounded bans from them.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐ record_*  ┌──────────────┐  publish  ┌───────────────┐
//! │ Round engine │──────────►│    Prison    │──────────►│ Audit channel │
//! │              │◄──────────│ (per-output  │           └───────────────┘
//! └──────────────┘  ban for  │   history)   │
//!                   outpoint └──────┬───────┘
//!                                   │ fold
//!                                   ▼
//!                   ┌──────────────────────────────┐
//!                   │ BanPolicy + CoinJoinRegistry │
//!                   └──────────────────────────────┘
//! ```
//!
//! ## Ban Model
//!
//! - Verification failures and cheating carry fixed bans that do not grow with repetition
//! - Round disruptions are punished inversely to the disrupted value
//! - Signing failures and double spends weigh more than missed confirmations
//! - Repeated disruptions escalate
//! - A first disruption with a large amount is forgiven
//! - Outputs of completed coinjoins are never banned for disruptions

mod coinjoin;
mod ledger;
mod offense;
mod policy;

pub use coinjoin::{CoinJoinIdStore, CoinJoinRegistry, NoCoinJoins};
pub use ledger::Prison;
pub use offense::{Offense, OffenseRecord, RoundDisruptionMethod};
pub use policy::{BanPolicy, BanTimePeriod};
