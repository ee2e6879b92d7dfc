//! Storage collaborators used by the vote engine and HTTP handlers.
//!
//! Each concern is a trait with an in-memory backend here and a Postgres
//! backend under `crate::db::repositories`.

pub mod catalog;
pub mod counter;
pub mod ledger;

pub use catalog::{MemoryCatalog, PollCatalog};
pub use counter::{CounterStore, MemoryCounterStore, Tally};
pub use ledger::{Ledger, MemoryLedger};
