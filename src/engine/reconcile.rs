use crate::db::models::PollId;
use crate::engine::resolution::VoteEngine;
use crate::error::VoteError;
use crate::hub::DeltaEvent;
use crate::store::Tally;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

impl VoteEngine {
    /// Recomputes the tally of `poll_id` from the ledger's vote records and
    /// overwrites the counter store with it. Votes on the poll wait until
    /// this finishes. Every option whose count changed is re-published so live
    /// subscribers converge.
    pub async fn reconcile(&self, poll_id: PollId) -> Result<Tally, VoteError> {
        let gate = self.poll_gates.get(&poll_id);
        let _exclusive = gate.write().await;

        let truth = self.ledger.count_votes(poll_id).await?;
        let current = self.counters.tally(poll_id).await?;
        self.counters.reset(poll_id, &truth).await?;

        let mut corrected = truth;
        for option_id in current.keys() {
            corrected.entry(*option_id).or_insert(0);
        }

        let mut changed = 0;
        for (option_id, votes) in &corrected {
            if current.get(option_id).copied().unwrap_or(0) != *votes {
                self.hub.publish(poll_id, DeltaEvent::new(*option_id, *votes));
                changed += 1;
            }
        }

        info!(%poll_id, changed, "tally reconciled from ledger");
        Ok(corrected)
    }
}

/// Drains the escalation queue, reconciling each poll once per batch.
pub fn spawn_reconciler(
    engine: Arc<VoteEngine>,
    mut escalations: mpsc::UnboundedReceiver<PollId>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(poll_id) = escalations.recv().await {
            let mut batch = HashSet::from([poll_id]);
            while let Ok(more) = escalations.try_recv() {
                batch.insert(more);
            }

            for poll_id in batch {
                if let Err(e) = engine.reconcile(poll_id).await {
                    error!(%poll_id, error = %e, "reconciliation failed");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use crate::db::models::SessionId;
    use crate::engine::{VoteEngine, spawn_reconciler};
    use crate::hub::{DeltaEvent, Hub};
    use crate::store::{CounterStore, Ledger, MemoryCounterStore, MemoryLedger};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    #[tokio::test]
    async fn reconcile_restores_ledger_counts_and_publishes_changes() {
        let ledger = Arc::new(MemoryLedger::new());
        let counters = Arc::new(MemoryCounterStore::default());
        let engine = VoteEngine::new(ledger.clone(), counters.clone(), Hub::default());
        let poll = Uuid::new_v4();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        ledger
            .create_vote(&SessionId::new("s1"), poll, a)
            .await
            .unwrap();
        ledger
            .create_vote(&SessionId::new("s2"), poll, a)
            .await
            .unwrap();
        // Tally drifted: one increment lost on `a`, a phantom count on `b`.
        counters.increment(poll, a).await.unwrap();
        counters.increment(poll, b).await.unwrap();

        let mut sub = engine.hub().subscribe(poll);
        let tally = engine.reconcile(poll).await.unwrap();

        assert_eq!(tally[&a], 2);
        assert_eq!(tally[&b], 0);
        assert_eq!(counters.tally(poll).await.unwrap(), tally);

        let mut events = vec![sub.recv().await.unwrap(), sub.recv().await.unwrap()];
        events.sort_by_key(|e| e.votes);
        assert_eq!(events, vec![DeltaEvent::new(b, 0), DeltaEvent::new(a, 2)]);
    }

    #[tokio::test]
    async fn reconcile_is_silent_when_consistent() {
        let engine = VoteEngine::new(
            Arc::new(MemoryLedger::new()),
            Arc::new(MemoryCounterStore::default()),
            Hub::default(),
        );
        let poll = Uuid::new_v4();
        engine
            .submit_vote(None, poll, Uuid::new_v4())
            .await
            .unwrap();

        let mut sub = engine.hub().subscribe(poll);
        engine.reconcile(poll).await.unwrap();
        drop(engine);

        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn reconciler_task_handles_escalations() {
        let ledger = Arc::new(MemoryLedger::new());
        let counters = Arc::new(MemoryCounterStore::default());
        let engine = Arc::new(VoteEngine::new(
            ledger.clone(),
            counters.clone(),
            Hub::default(),
        ));
        let poll = Uuid::new_v4();
        let option = Uuid::new_v4();
        ledger
            .create_vote(&SessionId::new("s"), poll, option)
            .await
            .unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let task = spawn_reconciler(engine, rx);
        tx.send(poll).unwrap();
        tx.send(poll).unwrap();
        drop(tx);

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(counters.tally(poll).await.unwrap()[&option], 1);
    }
}
