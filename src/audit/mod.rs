//! Audit Channel
//!
//! Carries every recorded offense from the prison to durable storage.
//!
//! ```text
//! ┌────────┐ publish ┌──────────────┐ recv ┌──────────────┐ persist ┌─────────────┐
//! │ Prison │────────►│ AuditSender  │─────►│ drain worker │────────►│ OffenseSink │
//! └────────┘         │ AuditReceiver│      └──────────────┘         └─────────────┘
//!                    └──────────────┘
//! ```

mod channel;
mod sink;

pub use channel::{AuditReceiver, AuditSender, audit_channel};
pub use sink::{MemorySink, OffenseSink, TracingSink};
