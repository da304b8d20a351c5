//! Persistence & Trade Settlement Service
//!
//! Owns the order ledger seam and everything that writes to it after a
//! match: optimistic-concurrency settlement with bounded retry, escalation
//! of fatal settlements for reconciliation, and the per-partition queues
//! that keep ledger writes in book order without blocking matching.

pub mod ledger;
pub mod settlement;
pub mod pipeline;

pub use ledger::{InMemoryLedger, Ledger, LedgerError, OrderWrite};
pub use pipeline::{PipelineClosed, SettlementBacklog, SettlementHandle, SettlementJob, SettlementPipeline};
pub use settlement::{
    ReconciliationEntry, ReconciliationLog, SettlementConfig, SettlementError, SettlementEvent,
    Settler,
};
