use crate::db::models::{PollId, PollOptionId, SessionId};
use crate::engine::locks::LockTable;
use crate::error::{CounterError, LedgerError, VoteError};
use crate::hub::{DeltaEvent, Hub};
use crate::store::{CounterStore, Ledger};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteOutcome {
    /// The vote is live. Carries the session the vote was recorded under,
    /// freshly minted when the request had none.
    Accepted(SessionId),
    /// The session already has a live vote for this option. Nothing changed.
    AlreadyVoted,
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Increment,
    Decrement,
}

/// Decides whether a vote is accepted, rejected or switched and applies the
/// matching counter delta exactly once.
pub struct VoteEngine {
    pub(super) ledger: Arc<dyn Ledger>,
    pub(super) counters: Arc<dyn CounterStore>,
    pub(super) hub: Hub,
    session_locks: LockTable<(SessionId, PollId), Mutex<()>>,
    /// Held from a counter mutation until its delta is published, so the
    /// deltas of one option leave in counter order.
    option_locks: LockTable<(PollId, PollOptionId), Mutex<()>>,
    /// Votes hold the shared side, reconciliation the exclusive side.
    pub(super) poll_gates: LockTable<PollId, RwLock<()>>,
    escalations: Option<mpsc::UnboundedSender<PollId>>,
}

impl VoteEngine {
    pub fn new(ledger: Arc<dyn Ledger>, counters: Arc<dyn CounterStore>, hub: Hub) -> Self {
        Self {
            ledger,
            counters,
            hub,
            session_locks: LockTable::new(),
            option_locks: LockTable::new(),
            poll_gates: LockTable::new(),
            escalations: None,
        }
    }

    /// Polls whose tally diverged from the ledger are sent to `escalations`.
    pub fn with_escalation(mut self, escalations: mpsc::UnboundedSender<PollId>) -> Self {
        self.escalations = Some(escalations);
        self
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub async fn submit_vote(
        &self,
        session_id: Option<SessionId>,
        poll_id: PollId,
        poll_option_id: PollOptionId,
    ) -> Result<VoteOutcome, VoteError> {
        // Gate before session lock. The reverse order can deadlock against a
        // pending reconciliation.
        let gate = self.poll_gates.get(&poll_id);
        let _shared = gate.read().await;

        let (session_id, returning) = match session_id {
            Some(session_id) => (session_id, true),
            None => (SessionId::generate(), false),
        };

        let session_lock = self.session_locks.get(&(session_id.clone(), poll_id));
        let _exclusive = session_lock.lock().await;

        if returning {
            if let Some(previous) = self.ledger.find_vote(&session_id, poll_id).await? {
                if previous.poll_option_id == poll_option_id {
                    debug!(%poll_id, %session_id, "duplicate vote rejected");
                    return Ok(VoteOutcome::AlreadyVoted);
                }

                self.ledger.delete_vote(previous.id).await?;
                self.apply_delta(poll_id, previous.poll_option_id, Step::Decrement)
                    .await?;
                debug!(
                    %poll_id,
                    %session_id,
                    from = %previous.poll_option_id,
                    to = %poll_option_id,
                    "switching vote"
                );
            }
        }

        match self
            .ledger
            .create_vote(&session_id, poll_id, poll_option_id)
            .await
        {
            Ok(_) => {}
            Err(LedgerError::Conflict) => {
                // Another writer recorded a vote for this session first. That
                // vote is live and already counted.
                warn!(%poll_id, %session_id, "concurrent vote won the ledger race");
                return Ok(VoteOutcome::AlreadyVoted);
            }
            Err(e) => {
                error!(%poll_id, %session_id, error = %e, "ledger write failed");
                return Err(e.into());
            }
        }

        let votes = self
            .apply_delta(poll_id, poll_option_id, Step::Increment)
            .await?;

        info!(%poll_id, option_id = %poll_option_id, votes, "vote accepted");
        Ok(VoteOutcome::Accepted(session_id))
    }

    /// Mutates one counter and publishes the resulting count. Only one
    /// mutation per option is in flight at a time. Never called while another
    /// option lock is held.
    async fn apply_delta(
        &self,
        poll_id: PollId,
        option_id: PollOptionId,
        step: Step,
    ) -> Result<i64, VoteError> {
        let option_lock = self.option_locks.get(&(poll_id, option_id));
        let _ordered = option_lock.lock().await;

        let result = match step {
            Step::Increment => self.counters.increment(poll_id, option_id).await,
            Step::Decrement => self.counters.decrement(poll_id, option_id).await,
        };
        let votes = result.map_err(|source| self.partial_apply(poll_id, option_id, source))?;
        self.hub.publish(poll_id, DeltaEvent::new(option_id, votes));
        Ok(votes)
    }

    fn partial_apply(
        &self,
        poll_id: PollId,
        option_id: PollOptionId,
        source: CounterError,
    ) -> VoteError {
        error!(
            %poll_id,
            %option_id,
            error = %source,
            "ledger and tally diverged, escalating for reconciliation"
        );
        if let Some(escalations) = &self.escalations {
            if escalations.send(poll_id).is_err() {
                error!(%poll_id, "reconciler is gone, tally stays diverged");
            }
        }
        VoteError::PartialApply {
            poll_id,
            option_id,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Vote;
    use crate::store::{MemoryCounterStore, MemoryLedger, Tally};
    use async_trait::async_trait;
    use futures::FutureExt;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    struct Fixture {
        engine: VoteEngine,
        counters: Arc<MemoryCounterStore>,
        ledger: Arc<MemoryLedger>,
        poll: PollId,
        a: PollOptionId,
        b: PollOptionId,
    }

    fn fixture() -> Fixture {
        let ledger = Arc::new(MemoryLedger::new());
        let counters = Arc::new(MemoryCounterStore::default());
        let engine = VoteEngine::new(ledger.clone(), counters.clone(), Hub::default());
        Fixture {
            engine,
            counters,
            ledger,
            poll: Uuid::new_v4(),
            a: Uuid::new_v4(),
            b: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn first_vote_mints_a_session() {
        let f = fixture();
        let mut sub = f.engine.hub().subscribe(f.poll);

        let outcome = f.engine.submit_vote(None, f.poll, f.a).await.unwrap();
        let VoteOutcome::Accepted(session) = outcome else {
            panic!("expected an accepted vote");
        };

        assert!(f.ledger.find_vote(&session, f.poll).await.unwrap().is_some());
        assert_eq!(sub.recv().await, Some(DeltaEvent::new(f.a, 1)));
    }

    #[tokio::test]
    async fn unknown_session_token_votes_normally() {
        let f = fixture();
        let session = SessionId::new("carried-over");

        let outcome = f
            .engine
            .submit_vote(Some(session.clone()), f.poll, f.a)
            .await
            .unwrap();

        assert_eq!(outcome, VoteOutcome::Accepted(session));
        assert_eq!(f.counters.tally(f.poll).await.unwrap()[&f.a], 1);
    }

    #[tokio::test]
    async fn switch_emits_decrement_then_increment() {
        let f = fixture();
        let session = SessionId::new("s");
        f.engine
            .submit_vote(Some(session.clone()), f.poll, f.a)
            .await
            .unwrap();
        let mut sub = f.engine.hub().subscribe(f.poll);

        f.engine
            .submit_vote(Some(session.clone()), f.poll, f.b)
            .await
            .unwrap();

        assert_eq!(sub.recv().await, Some(DeltaEvent::new(f.a, 0)));
        assert_eq!(sub.recv().await, Some(DeltaEvent::new(f.b, 1)));
        let vote = f.ledger.find_vote(&session, f.poll).await.unwrap().unwrap();
        assert_eq!(vote.poll_option_id, f.b);
    }

    struct DownLedger;

    #[async_trait]
    impl Ledger for DownLedger {
        async fn find_vote(&self, _: &SessionId, _: PollId) -> Result<Option<Vote>, LedgerError> {
            Err(LedgerError::Unavailable("down".into()))
        }
        async fn create_vote(
            &self,
            _: &SessionId,
            _: PollId,
            _: PollOptionId,
        ) -> Result<Vote, LedgerError> {
            Err(LedgerError::Unavailable("down".into()))
        }
        async fn delete_vote(&self, _: Uuid) -> Result<(), LedgerError> {
            Err(LedgerError::Unavailable("down".into()))
        }
        async fn count_votes(&self, _: PollId) -> Result<HashMap<PollOptionId, i64>, LedgerError> {
            Err(LedgerError::Unavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn ledger_outage_leaves_counters_untouched() {
        let counters = Arc::new(MemoryCounterStore::default());
        let engine = VoteEngine::new(Arc::new(DownLedger), counters.clone(), Hub::default());
        let poll = Uuid::new_v4();
        let mut sub = engine.hub().subscribe(poll);

        let err = engine
            .submit_vote(Some(SessionId::new("s")), poll, Uuid::new_v4())
            .await
            .unwrap_err();

        assert!(matches!(err, VoteError::Storage(LedgerError::Unavailable(_))));
        assert!(counters.tally(poll).await.unwrap().is_empty());
        assert!(sub.recv().now_or_never().is_none());
    }

    struct DownCounters;

    #[async_trait]
    impl CounterStore for DownCounters {
        async fn increment(&self, _: PollId, _: PollOptionId) -> Result<i64, CounterError> {
            Err(CounterError::Unavailable("down".into()))
        }
        async fn decrement(&self, _: PollId, _: PollOptionId) -> Result<i64, CounterError> {
            Err(CounterError::Unavailable("down".into()))
        }
        async fn tally(&self, _: PollId) -> Result<Tally, CounterError> {
            Err(CounterError::Unavailable("down".into()))
        }
        async fn reset(&self, _: PollId, _: &Tally) -> Result<(), CounterError> {
            Err(CounterError::Unavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn counter_outage_after_ledger_write_is_escalated() {
        let ledger = Arc::new(MemoryLedger::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let engine = VoteEngine::new(ledger.clone(), Arc::new(DownCounters), Hub::default())
            .with_escalation(tx);
        let poll = Uuid::new_v4();
        let option = Uuid::new_v4();
        let session = SessionId::new("s");

        let err = engine
            .submit_vote(Some(session.clone()), poll, option)
            .await
            .unwrap_err();

        assert!(matches!(err, VoteError::PartialApply { option_id, .. } if option_id == option));
        assert!(ledger.find_vote(&session, poll).await.unwrap().is_some());
        assert_eq!(rx.try_recv().unwrap(), poll);
    }

    /// Delegates to an in-memory store, but stalls the first increment after
    /// it has already been applied.
    struct StallingCounters {
        inner: MemoryCounterStore,
        stalled: AtomicBool,
    }

    #[async_trait]
    impl CounterStore for StallingCounters {
        async fn increment(
            &self,
            poll_id: PollId,
            option_id: PollOptionId,
        ) -> Result<i64, CounterError> {
            let votes = self.inner.increment(poll_id, option_id).await?;
            if !self.stalled.swap(true, Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            Ok(votes)
        }
        async fn decrement(
            &self,
            poll_id: PollId,
            option_id: PollOptionId,
        ) -> Result<i64, CounterError> {
            self.inner.decrement(poll_id, option_id).await
        }
        async fn tally(&self, poll_id: PollId) -> Result<Tally, CounterError> {
            self.inner.tally(poll_id).await
        }
        async fn reset(&self, poll_id: PollId, counts: &Tally) -> Result<(), CounterError> {
            self.inner.reset(poll_id, counts).await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn deltas_for_one_option_leave_in_counter_order() {
        let counters = Arc::new(StallingCounters {
            inner: MemoryCounterStore::default(),
            stalled: AtomicBool::new(false),
        });
        let engine = Arc::new(VoteEngine::new(
            Arc::new(MemoryLedger::new()),
            counters.clone(),
            Hub::default(),
        ));
        let poll = Uuid::new_v4();
        let option = Uuid::new_v4();
        let mut sub = engine.hub().subscribe(poll);

        let first = tokio::spawn({
            let engine = engine.clone();
            async move { engine.submit_vote(None, poll, option).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = tokio::spawn({
            let engine = engine.clone();
            async move { engine.submit_vote(None, poll, option).await }
        });
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        let deltas = vec![sub.recv().await.unwrap(), sub.recv().await.unwrap()];
        assert_eq!(
            deltas,
            vec![DeltaEvent::new(option, 1), DeltaEvent::new(option, 2)]
        );
        let tally = counters.tally(poll).await.unwrap();
        assert_eq!(deltas.last().unwrap().votes, tally[&option]);
    }

    /// Delegates to an in-memory store, but every decrement fails.
    struct NoDecrements(MemoryCounterStore);

    #[async_trait]
    impl CounterStore for NoDecrements {
        async fn increment(
            &self,
            poll_id: PollId,
            option_id: PollOptionId,
        ) -> Result<i64, CounterError> {
            self.0.increment(poll_id, option_id).await
        }
        async fn decrement(&self, _: PollId, _: PollOptionId) -> Result<i64, CounterError> {
            Err(CounterError::Unavailable("down".into()))
        }
        async fn tally(&self, poll_id: PollId) -> Result<Tally, CounterError> {
            self.0.tally(poll_id).await
        }
        async fn reset(&self, poll_id: PollId, counts: &Tally) -> Result<(), CounterError> {
            self.0.reset(poll_id, counts).await
        }
    }

    #[tokio::test]
    async fn failed_switch_decrement_stops_before_the_new_vote() {
        let ledger = Arc::new(MemoryLedger::new());
        let counters = Arc::new(NoDecrements(MemoryCounterStore::default()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let engine = VoteEngine::new(ledger.clone(), counters.clone(), Hub::default())
            .with_escalation(tx);
        let poll = Uuid::new_v4();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let session = SessionId::new("s");
        engine
            .submit_vote(Some(session.clone()), poll, a)
            .await
            .unwrap();
        let mut sub = engine.hub().subscribe(poll);

        let err = engine
            .submit_vote(Some(session.clone()), poll, b)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            VoteError::PartialApply { option_id, source: CounterError::Unavailable(_), .. }
                if option_id == a
        ));
        assert!(ledger.find_vote(&session, poll).await.unwrap().is_none());
        let tally = counters.tally(poll).await.unwrap();
        assert_eq!(tally[&a], 1);
        assert!(!tally.contains_key(&b));
        assert!(sub.recv().now_or_never().is_none());
        assert_eq!(rx.try_recv().unwrap(), poll);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn switch_off_an_uncounted_vote_is_repaired_by_reconcile() {
        let ledger = Arc::new(MemoryLedger::new());
        let counters = Arc::new(MemoryCounterStore::new(true));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let engine = VoteEngine::new(ledger.clone(), counters.clone(), Hub::default())
            .with_escalation(tx);
        let poll = Uuid::new_v4();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let session = SessionId::new("s");
        // Both votes reached the ledger without touching the counters.
        ledger.create_vote(&session, poll, a).await.unwrap();
        ledger
            .create_vote(&SessionId::new("t"), poll, a)
            .await
            .unwrap();
        let mut sub = engine.hub().subscribe(poll);

        let err = engine
            .submit_vote(Some(session.clone()), poll, b)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            VoteError::PartialApply {
                option_id,
                source: CounterError::InvalidState { current: 0, .. },
                ..
            } if option_id == a
        ));
        assert!(sub.recv().now_or_never().is_none());
        assert_eq!(rx.try_recv().unwrap(), poll);

        let tally = engine.reconcile(poll).await.unwrap();
        assert_eq!(tally, HashMap::from([(a, 1)]));
        assert_eq!(counters.tally(poll).await.unwrap(), tally);
        assert_eq!(sub.recv().await, Some(DeltaEvent::new(a, 1)));
    }
}
