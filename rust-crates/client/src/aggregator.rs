use crate::{
    ledger::{
        Ledger,
        LedgerError,
        ReadCall,
        ReadResult,
    },
    pool::{
        Pool,
        PoolDecodeError,
        PoolId,
    },
};
use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{
            AtomicU64,
            Ordering,
        },
    },
    time::Duration,
};
use tokio::sync::watch;
use tracing::{
    debug,
    warn,
};

#[cfg(test)]
mod tests;

pub const DEFAULT_BATCH_SIZE: usize = 5;
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(250);

/// Published view of every pool. The list is only ever swapped whole.
#[derive(Clone, Debug)]
pub struct PoolListState {
    pub pools: Arc<[Pool]>,
    pub loading: bool,
    /// Refresh run that produced this state.
    pub generation: u64,
}

impl Default for PoolListState {
    fn default() -> Self {
        Self {
            pools: Arc::from(Vec::new()),
            loading: false,
            generation: 0,
        }
    }
}

impl PoolListState {
    pub fn get(&self, pool_id: PoolId) -> Option<&Pool> {
        self.pools
            .binary_search_by_key(&pool_id, |pool| pool.id)
            .ok()
            .map(|index| &self.pools[index])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Applied { pools: usize },
    /// A newer refresh started while this one was in flight; its results were dropped.
    Superseded,
    /// The pool count could not be read; the previous list stays published.
    CountFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolLoadError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Invalid(#[from] PoolDecodeError),
    #[error("unexpected response shape for pool {0}")]
    UnexpectedValue(PoolId),
}

pub struct PoolAggregator<L> {
    ledger: Arc<L>,
    batch_size: usize,
    batch_delay: Duration,
    generation: AtomicU64,
    state: watch::Sender<PoolListState>,
}

impl<L: Ledger> PoolAggregator<L> {
    pub fn new(ledger: Arc<L>) -> Self {
        Self::with_batching(ledger, DEFAULT_BATCH_SIZE, DEFAULT_BATCH_DELAY)
    }

    pub fn with_batching(ledger: Arc<L>, batch_size: usize, batch_delay: Duration) -> Self {
        let (state, _) = watch::channel(PoolListState::default());
        Self {
            ledger,
            batch_size: batch_size.max(1),
            batch_delay,
            generation: AtomicU64::new(0),
            state,
        }
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    pub fn subscribe(&self) -> watch::Receiver<PoolListState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> PoolListState {
        self.state.borrow().clone()
    }

    /// Read every pool in batches of `batch_size` ids, pausing `batch_delay` between
    /// batches. Ids whose reads fail are left out; only a failed count is an error.
    pub async fn load_all(&self) -> Result<Vec<Pool>, LedgerError> {
        let count = self.ledger.pool_count().await?;
        if count == 0 {
            return Ok(Vec::new());
        }

        let ids: Vec<PoolId> = (0..count).collect();
        let batches: Vec<&[PoolId]> = ids.chunks(self.batch_size).collect();
        let mut pools = BTreeMap::new();
        for (index, batch) in batches.iter().enumerate() {
            let calls: Vec<ReadCall> = batch
                .iter()
                .flat_map(|id| [ReadCall::PoolDetails(*id), ReadCall::PoolCreatedAt(*id)])
                .collect();
            match self.ledger.read_batch(&calls).await {
                Ok(results) => {
                    for (id, pair) in batch.iter().zip(results.chunks(2)) {
                        match assemble(*id, pair) {
                            Ok(pool) => {
                                pools.insert(pool.id, pool);
                            }
                            Err(err) => warn!(pool_id = id, %err, "skipping pool"),
                        }
                    }
                }
                Err(err) => warn!(
                    first = batch[0],
                    last = batch[batch.len() - 1],
                    %err,
                    "pool batch read failed; skipping batch"
                ),
            }
            debug!(batch = index + 1, of = batches.len(), "pool batch done");
            if index + 1 < batches.len() {
                tokio::time::sleep(self.batch_delay).await;
            }
        }
        Ok(pools.into_values().collect())
    }

    /// Reload the list and publish it, unless another refresh started meanwhile.
    pub async fn refresh(&self) -> RefreshOutcome {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_modify(|state| state.loading = true);

        let result = self.load_all().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(generation, "refresh superseded; discarding results");
            return RefreshOutcome::Superseded;
        }

        match result {
            Ok(pools) => {
                let count = pools.len();
                self.state.send_replace(PoolListState {
                    pools: Arc::from(pools),
                    loading: false,
                    generation,
                });
                RefreshOutcome::Applied { pools: count }
            }
            Err(err) => {
                warn!(%err, "pool count read failed; keeping previous list");
                self.state.send_modify(|state| {
                    state.loading = false;
                    state.generation = generation;
                });
                RefreshOutcome::CountFailed
            }
        }
    }

    /// Details and creation time of a single pool, outside the batch schedule.
    pub async fn load_one(&self, pool_id: PoolId) -> Result<Pool, PoolLoadError> {
        let calls = [
            ReadCall::PoolDetails(pool_id),
            ReadCall::PoolCreatedAt(pool_id),
        ];
        let results = self.ledger.read_batch(&calls).await?;
        assemble(pool_id, &results)
    }
}

fn assemble(pool_id: PoolId, pair: &[ReadResult]) -> Result<Pool, PoolLoadError> {
    match pair {
        [Ok(details), Ok(created_at)] => {
            let details = details
                .clone()
                .into_details()
                .ok_or(PoolLoadError::UnexpectedValue(pool_id))?;
            let created_at = created_at
                .clone()
                .into_uint()
                .ok_or(PoolLoadError::UnexpectedValue(pool_id))?;
            Ok(Pool::from_parts(pool_id, details, created_at)?)
        }
        [Err(err), _] | [_, Err(err)] => Err(err.clone().into()),
        _ => Err(PoolLoadError::UnexpectedValue(pool_id)),
    }
}
