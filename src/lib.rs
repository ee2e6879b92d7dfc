//! Live poll voting: one vote per session per poll, with vote switching, and
//! per-poll tally deltas pushed to every connected client.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod hub;
pub mod live;
pub mod polls;
pub mod startup;
pub mod store;

pub use config::Config;
pub use engine::{VoteEngine, VoteOutcome};
pub use hub::{DeltaEvent, Hub, Subscription};
pub use startup::{AppState, router};
