use crate::db::models::{PollId, PollOptionId};
use crate::error::CounterError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

/// Per-option vote counts of one poll.
pub type Tally = HashMap<PollOptionId, i64>;

/// Authoritative vote tallies.
///
/// `increment` and `decrement` are atomic per `(poll_id, option_id)` and
/// return the value after the mutation. Callers never read-modify-write.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn increment(&self, poll_id: PollId, option_id: PollOptionId)
    -> Result<i64, CounterError>;

    /// Fails with `CounterError::InvalidState` and leaves the counter untouched
    /// when the store enforces a zero floor and the counter is already zero.
    async fn decrement(&self, poll_id: PollId, option_id: PollOptionId)
    -> Result<i64, CounterError>;

    async fn tally(&self, poll_id: PollId) -> Result<Tally, CounterError>;

    /// Overwrites every counter of `poll_id` with `counts`. Options missing from
    /// `counts` are set to zero.
    async fn reset(&self, poll_id: PollId, counts: &Tally) -> Result<(), CounterError>;
}

type Cells = HashMap<PollId, HashMap<PollOptionId, Arc<AtomicI64>>>;

pub struct MemoryCounterStore {
    cells: RwLock<Cells>,
    non_negative: bool,
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new(true)
    }
}

impl MemoryCounterStore {
    pub fn new(non_negative: bool) -> Self {
        Self {
            cells: RwLock::new(HashMap::new()),
            non_negative,
        }
    }

    fn poisoned() -> CounterError {
        CounterError::Unavailable("counter lock poisoned".to_string())
    }

    fn cell(&self, poll_id: PollId, option_id: PollOptionId) -> Result<Arc<AtomicI64>, CounterError> {
        {
            let cells = self.cells.read().map_err(|_| Self::poisoned())?;
            if let Some(cell) = cells.get(&poll_id).and_then(|p| p.get(&option_id)) {
                return Ok(cell.clone());
            }
        }

        let mut cells = self.cells.write().map_err(|_| Self::poisoned())?;
        Ok(cells
            .entry(poll_id)
            .or_default()
            .entry(option_id)
            .or_default()
            .clone())
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(
        &self,
        poll_id: PollId,
        option_id: PollOptionId,
    ) -> Result<i64, CounterError> {
        let cell = self.cell(poll_id, option_id)?;
        Ok(cell.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn decrement(
        &self,
        poll_id: PollId,
        option_id: PollOptionId,
    ) -> Result<i64, CounterError> {
        let cell = self.cell(poll_id, option_id)?;
        if !self.non_negative {
            return Ok(cell.fetch_sub(1, Ordering::SeqCst) - 1);
        }

        cell.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
            (current > 0).then_some(current - 1)
        })
        .map(|previous| previous - 1)
        .map_err(|current| CounterError::InvalidState {
            poll_id,
            option_id,
            current,
        })
    }

    async fn tally(&self, poll_id: PollId) -> Result<Tally, CounterError> {
        let cells = self.cells.read().map_err(|_| Self::poisoned())?;
        Ok(cells
            .get(&poll_id)
            .map(|options| {
                options
                    .iter()
                    .map(|(id, cell)| (*id, cell.load(Ordering::SeqCst)))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn reset(&self, poll_id: PollId, counts: &Tally) -> Result<(), CounterError> {
        let mut cells = self.cells.write().map_err(|_| Self::poisoned())?;
        let options = cells.entry(poll_id).or_default();
        for (option_id, cell) in options.iter() {
            cell.store(counts.get(option_id).copied().unwrap_or(0), Ordering::SeqCst);
        }
        for (option_id, count) in counts {
            options
                .entry(*option_id)
                .or_insert_with(|| Arc::new(AtomicI64::new(*count)));
        }
        Ok(())
    }
}
