use crate::db::models::PollId;
use crate::hub::{Hub, Subscription};
use tracing::{info, warn};

/// Binds one client connection to one hub subscription.
///
/// No snapshot is sent: the client sees only deltas published after
/// `open`. Dropping the session releases the subscription.
pub struct SubscriberSession {
    subscription: Subscription,
}

impl SubscriberSession {
    pub fn open(hub: &Hub, poll_id: PollId) -> Self {
        let subscription = hub.subscribe(poll_id);
        info!(%poll_id, subscriber_id = subscription.id(), "live results subscriber attached");
        Self { subscription }
    }

    pub fn poll_id(&self) -> PollId {
        self.subscription.poll_id()
    }

    /// Next serialized `{"pollOptionId","votes"}` message, or `None` when the
    /// hub is gone.
    pub async fn next_message(&mut self) -> Option<String> {
        loop {
            let event = self.subscription.recv().await?;
            match event.to_message() {
                Ok(message) => return Some(message),
                Err(e) => warn!(poll_id = %self.poll_id(), error = %e, "dropping unserializable delta"),
            }
        }
    }
}

impl Drop for SubscriberSession {
    fn drop(&mut self) {
        info!(
            poll_id = %self.subscription.poll_id(),
            subscriber_id = self.subscription.id(),
            "live results subscriber detached"
        );
    }
}
