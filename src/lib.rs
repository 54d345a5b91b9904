//! Coinjoin Coordinator
//!
//! Misbehavior ledger and audit publication for a coinjoin round coordinator.
//! Outputs that disrupt rounds, fail verification, or cheat are recorded in the
//! prison, banned for a policy-derived period, and every recorded offense is
//! published to an audit consumer.
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── lib.rs         - Crate root with re-exports
//! ├── main.rs        - Coordinator entrypoint
//! ├── config.rs      - Configuration (file + environment)
//! ├── types.rs       - Txid, OutPoint, RoundId, Amount
//! ├── prison/        - Misbehavior ledger
//! │   ├── offense.rs  - Offense kinds and records
//! │   ├── policy.rs   - Ban periods derived from history
//! │   ├── coinjoin.rs - Known coinjoin transaction ids
//! │   └── ledger.rs   - Per-output history and publication
//! ├── audit/         - Offense publication
//! │   ├── channel.rs  - Unbounded FIFO with pending count
//! │   └── sink.rs     - Where drained records end up
//! └── coordinator/   - Start/stop lifecycle
//!     ├── cancel.rs   - Cancellation signals
//!     └── worker.rs   - Audit drain worker
//! ```

pub mod audit;
pub mod config;
pub mod coordinator;
pub mod prison;
pub mod types;

// Re-export main types for convenience
pub use audit::{AuditReceiver, AuditSender, MemorySink, OffenseSink, TracingSink, audit_channel};
pub use config::{AuditConfig, CoordinatorConfig, LoggingConfig, PrisonConfig};
pub use coordinator::{
    CancelSignal, CancelSource, Coordinator, CoordinatorParameters, CoordinatorState,
};
pub use prison::{
    BanPolicy, BanTimePeriod, CoinJoinIdStore, CoinJoinRegistry, NoCoinJoins, Offense,
    OffenseRecord, Prison, RoundDisruptionMethod,
};
pub use types::{Amount, OutPoint, RoundId, Txid};
