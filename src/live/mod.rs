//! Live results: one subscriber session per client connection, forwarding
//! hub deltas over WebSocket or Server-Sent Events.

mod poll_results_sse;
mod poll_results_ws;
mod session;

pub use poll_results_sse::poll_results_sse;
pub use poll_results_ws::poll_results_ws;
pub use session::SubscriberSession;
