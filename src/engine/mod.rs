//! Vote resolution: turns a vote request into ledger writes, counter
//! mutations and hub deltas.

mod locks;
mod reconcile;
mod resolution;

pub use locks::LockTable;
pub use reconcile::spawn_reconciler;
pub use resolution::{VoteEngine, VoteOutcome};
