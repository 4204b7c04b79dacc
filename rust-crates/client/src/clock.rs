use crate::ledger::Ledger;
use std::{
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::watch,
    time,
};
use tracing::warn;
use web3::types::U256;

pub const DEFAULT_CLOCK_POLL: Duration = Duration::from_secs(4);

/// Latest observed block height and block timestamp.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClockReading {
    pub block: U256,
    pub timestamp: U256,
}

/// Polls the chain clocks into a watch channel. A failed read keeps the previous value.
pub struct ChainClock<L> {
    ledger: Arc<L>,
    interval: Duration,
    reading: watch::Sender<ClockReading>,
}

impl<L: Ledger> ChainClock<L> {
    pub fn new(ledger: Arc<L>, interval: Duration) -> Self {
        let (reading, _) = watch::channel(ClockReading::default());
        Self {
            ledger,
            interval,
            reading,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ClockReading> {
        self.reading.subscribe()
    }

    pub fn reading(&self) -> ClockReading {
        *self.reading.borrow()
    }

    pub async fn poll_once(&self) -> ClockReading {
        let (block, timestamp) = tokio::join!(
            self.ledger.current_block_height(),
            self.ledger.current_block_timestamp()
        );
        let mut next = self.reading();
        match block {
            Ok(block) => next.block = block,
            Err(err) => warn!(%err, "block height poll failed"),
        }
        match timestamp {
            Ok(timestamp) => next.timestamp = timestamp,
            Err(err) => warn!(%err, "block timestamp poll failed"),
        }
        self.reading.send_if_modified(|current| {
            let changed = *current != next;
            *current = next;
            changed
        });
        next
    }

    pub async fn run(&self) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.poll_once().await;
        }
    }
}
