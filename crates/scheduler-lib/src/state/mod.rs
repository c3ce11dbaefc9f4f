//! Shared scheduler state
//!
//! Each table is guarded by its own lock and handed out as a cheap
//! `Clone` handle. None of them is persisted; all start empty.

mod ledger;
mod node_store;
mod workload_history;

pub use ledger::{PendingBindLedger, DEFAULT_MAX_AGE};
pub use node_store::NodePowerStore;
pub use workload_history::WorkloadPowerHistory;
