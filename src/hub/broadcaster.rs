use crate::db::models::PollId;
use crate::hub::models::{DeltaEvent, HubDeliveryFault};
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<DeltaEvent>,
}

struct HubInner {
    polls: Mutex<HashMap<PollId, Vec<Subscriber>>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl HubInner {
    fn remove(&self, poll_id: PollId, subscriber_id: u64) {
        let Ok(mut polls) = self.polls.lock() else {
            error!(%poll_id, subscriber_id, "hub registry poisoned, cannot deregister");
            return;
        };
        if let Some(subscribers) = polls.get_mut(&poll_id) {
            subscribers.retain(|s| s.id != subscriber_id);
            if subscribers.is_empty() {
                polls.remove(&poll_id);
            }
        }
    }
}

/// In-process publish/subscribe register keyed by poll.
///
/// Every subscriber owns a bounded queue. `publish` hands each event to all
/// queues of the poll while holding the registry lock, so all subscribers of
/// a poll observe deltas in the same order. It never waits on a subscriber:
/// a full queue drops that one delta for that one subscriber.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

impl Hub {
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                polls: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                buffer: buffer.max(1),
            }),
        }
    }

    /// Registers a subscriber for `poll_id`. Only events published after this
    /// call are delivered. Dropping the returned `Subscription` deregisters it.
    pub fn subscribe(&self, poll_id: PollId) -> Subscription {
        let (tx, rx) = mpsc::channel(self.inner.buffer);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        match self.inner.polls.lock() {
            Ok(mut polls) => polls
                .entry(poll_id)
                .or_default()
                .push(Subscriber { id, tx }),
            // The sender is dropped here, so the subscription ends immediately.
            Err(_) => error!(%poll_id, "hub registry poisoned, subscription not registered"),
        }
        debug!(%poll_id, subscriber_id = id, "subscriber registered");

        Subscription {
            poll_id,
            id,
            rx,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Delivers `event` to every current subscriber of `poll_id`.
    /// Returns how many subscribers accepted it.
    pub fn publish(&self, poll_id: PollId, event: DeltaEvent) -> usize {
        let Ok(mut polls) = self.inner.polls.lock() else {
            error!(%poll_id, "hub registry poisoned, delta dropped");
            return 0;
        };
        let Some(subscribers) = polls.get_mut(&poll_id) else {
            return 0;
        };

        let mut delivered = 0;
        subscribers.retain(|subscriber| match subscriber.tx.try_send(event) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    %poll_id,
                    subscriber_id = subscriber.id,
                    fault = ?HubDeliveryFault::Lagging,
                    "subscriber queue full, delta skipped"
                );
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(
                    %poll_id,
                    subscriber_id = subscriber.id,
                    fault = ?HubDeliveryFault::Closed,
                    "pruning closed subscriber"
                );
                false
            }
        });

        if subscribers.is_empty() {
            polls.remove(&poll_id);
        }
        delivered
    }

    pub fn subscriber_count(&self, poll_id: PollId) -> usize {
        self.inner
            .polls
            .lock()
            .map(|polls| polls.get(&poll_id).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

/// Receiving end of one hub registration.
pub struct Subscription {
    poll_id: PollId,
    id: u64,
    rx: mpsc::Receiver<DeltaEvent>,
    hub: Weak<HubInner>,
}

impl Subscription {
    pub fn poll_id(&self) -> PollId {
        self.poll_id
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next delta for this poll, or `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<DeltaEvent> {
        self.rx.recv().await
    }
}

impl Stream for Subscription {
    type Item = DeltaEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.rx.close();
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.poll_id, self.id);
            debug!(poll_id = %self.poll_id, subscriber_id = self.id, "subscriber released");
        }
    }
}
