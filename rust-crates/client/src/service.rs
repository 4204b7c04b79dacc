//! Shared pool cache with an explicit lifecycle.
//!
//! The first [`PoolSubscription`] starts two background tasks, the chain clock poller and
//! the periodic list refresh. Dropping the last subscription aborts both. The service is
//! an ordinary value, so every test builds its own.
use crate::{
    aggregator::{
        PoolAggregator,
        PoolListState,
        RefreshOutcome,
    },
    clock::{
        ChainClock,
        ClockReading,
    },
    ledger::Ledger,
    pool::Pool,
    status::{
        PoolStatus,
        derive_status,
    },
};
use std::{
    sync::{
        Arc,
        Mutex,
    },
    time::Duration,
};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time,
};
use tracing::debug;

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

struct Lifecycle {
    subscribers: usize,
    tasks: Vec<JoinHandle<()>>,
}

struct Shared<L> {
    aggregator: Arc<PoolAggregator<L>>,
    clock: Arc<ChainClock<L>>,
    refresh_interval: Duration,
    lifecycle: Mutex<Lifecycle>,
}

pub struct PoolService<L> {
    shared: Arc<Shared<L>>,
}

impl<L> Clone for PoolService<L> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<L: Ledger + 'static> PoolService<L> {
    pub fn new(
        aggregator: PoolAggregator<L>,
        clock: ChainClock<L>,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                aggregator: Arc::new(aggregator),
                clock: Arc::new(clock),
                refresh_interval,
                lifecycle: Mutex::new(Lifecycle {
                    subscribers: 0,
                    tasks: Vec::new(),
                }),
            }),
        }
    }

    pub fn aggregator(&self) -> &Arc<PoolAggregator<L>> {
        &self.shared.aggregator
    }

    pub fn is_running(&self) -> bool {
        lock(&self.shared.lifecycle).subscribers > 0
    }

    pub fn subscribe(&self) -> PoolSubscription<L> {
        let mut lifecycle = lock(&self.shared.lifecycle);
        lifecycle.subscribers += 1;
        if lifecycle.subscribers == 1 {
            debug!("first pool subscriber; starting background tasks");
            lifecycle.tasks = self.spawn_tasks();
        }
        PoolSubscription {
            pools: self.shared.aggregator.subscribe(),
            clock: self.shared.clock.subscribe(),
            shared: self.shared.clone(),
        }
    }

    /// Run a refresh now. Any refresh already in flight is superseded.
    pub async fn refresh(&self) -> RefreshOutcome {
        self.shared.aggregator.refresh().await
    }

    fn spawn_tasks(&self) -> Vec<JoinHandle<()>> {
        let clock = self.shared.clock.clone();
        let clock_task = tokio::spawn(async move { clock.run().await });

        let aggregator = self.shared.aggregator.clone();
        let interval = self.shared.refresh_interval;
        let refresh_task = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                aggregator.refresh().await;
            }
        });
        vec![clock_task, refresh_task]
    }
}

/// Handle on the shared pool list and chain clock.
pub struct PoolSubscription<L> {
    pools: watch::Receiver<PoolListState>,
    clock: watch::Receiver<ClockReading>,
    shared: Arc<Shared<L>>,
}

impl<L> PoolSubscription<L> {
    pub fn pools(&self) -> PoolListState {
        self.pools.borrow().clone()
    }

    pub fn clock(&self) -> ClockReading {
        *self.clock.borrow()
    }

    /// Every pool paired with its status under the latest clock reading.
    pub fn statuses(&self) -> Vec<(Pool, PoolStatus)> {
        let clock = self.clock();
        self.pools()
            .pools
            .iter()
            .map(|pool| {
                (
                    pool.clone(),
                    derive_status(pool, clock.block, clock.timestamp),
                )
            })
            .collect()
    }

    /// Wait until either the pool list or the clock changes.
    pub async fn changed(&mut self) {
        tokio::select! {
            res = self.pools.changed() => { let _ = res; }
            res = self.clock.changed() => { let _ = res; }
        }
    }

    pub fn mark_seen(&mut self) {
        self.pools.borrow_and_update();
        self.clock.borrow_and_update();
    }
}

impl<L> Drop for PoolSubscription<L> {
    fn drop(&mut self) {
        let mut lifecycle = lock(&self.shared.lifecycle);
        lifecycle.subscribers = lifecycle.subscribers.saturating_sub(1);
        if lifecycle.subscribers == 0 {
            debug!("last pool subscriber gone; stopping background tasks");
            for task in lifecycle.tasks.drain(..) {
                task.abort();
            }
        }
    }
}

fn lock(lifecycle: &Mutex<Lifecycle>) -> std::sync::MutexGuard<'_, Lifecycle> {
    lifecycle
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
