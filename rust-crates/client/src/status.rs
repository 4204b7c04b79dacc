use crate::pool::{
    POOL_LIFETIME_SECS,
    Pool,
    REVEAL_WINDOW_BLOCKS,
    TICKETS_PER_POOL,
};
use std::fmt;
use web3::types::U256;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PoolStatus {
    Open,
    SoldOutWaiting,
    ReadyToReveal,
    RevealExpired,
    Revealed,
    Expired,
}

impl PoolStatus {
    pub const ALL: [PoolStatus; 6] = [
        PoolStatus::Open,
        PoolStatus::SoldOutWaiting,
        PoolStatus::ReadyToReveal,
        PoolStatus::RevealExpired,
        PoolStatus::Revealed,
        PoolStatus::Expired,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PoolStatus::Open => "open",
            PoolStatus::SoldOutWaiting => "sold_out_waiting",
            PoolStatus::ReadyToReveal => "ready_to_reveal",
            PoolStatus::RevealExpired => "reveal_expired",
            PoolStatus::Revealed => "revealed",
            PoolStatus::Expired => "expired",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PoolStatus::Open => "Active",
            PoolStatus::SoldOutWaiting => "Sold Out",
            PoolStatus::ReadyToReveal => "Ready to Reveal",
            PoolStatus::RevealExpired => "Reveal Expired",
            PoolStatus::Revealed => "Revealed",
            PoolStatus::Expired => "Expired",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PoolStatus::RevealExpired | PoolStatus::Revealed | PoolStatus::Expired
        )
    }

    /// Whether a pool currently in `self` may later be observed in `next`.
    pub fn can_move_to(self, next: PoolStatus) -> bool {
        use PoolStatus::*;
        if self == next {
            return true;
        }
        match self {
            Open => true,
            SoldOutWaiting => matches!(next, ReadyToReveal | RevealExpired | Revealed),
            ReadyToReveal => matches!(next, RevealExpired | Revealed),
            RevealExpired | Revealed | Expired => false,
        }
    }
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map an on-chain snapshot plus the current chain clock to a lifecycle status.
/// First matching rule wins: revealed, sold-out reveal window, calendar expiry, open.
pub fn derive_status(pool: &Pool, current_block: U256, current_timestamp: U256) -> PoolStatus {
    if pool.is_revealed {
        return PoolStatus::Revealed;
    }
    if pool.tickets_sold == TICKETS_PER_POOL && !pool.reveal_block.is_zero() {
        return if current_block > reveal_deadline(pool) {
            PoolStatus::RevealExpired
        } else if current_block >= pool.reveal_block {
            PoolStatus::ReadyToReveal
        } else {
            PoolStatus::SoldOutWaiting
        };
    }
    if current_timestamp > expires_at(pool) {
        return PoolStatus::Expired;
    }
    PoolStatus::Open
}

/// Last block at which the reveal is still accepted.
pub fn reveal_deadline(pool: &Pool) -> U256 {
    pool.reveal_block.saturating_add(U256::from(REVEAL_WINDOW_BLOCKS))
}

pub fn expires_at(pool: &Pool) -> U256 {
    pool.created_at.saturating_add(U256::from(POOL_LIFETIME_SECS))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RevealCountdown {
    /// Blocks left before the reveal window opens.
    OpensIn(U256),
    /// Blocks left before the reveal window closes.
    ClosesIn(U256),
}

pub fn reveal_countdown(pool: &Pool, current_block: U256) -> Option<RevealCountdown> {
    if pool.is_revealed
        || pool.tickets_sold != TICKETS_PER_POOL
        || pool.reveal_block.is_zero()
    {
        return None;
    }
    if current_block < pool.reveal_block {
        return Some(RevealCountdown::OpensIn(pool.reveal_block - current_block));
    }
    let deadline = reveal_deadline(pool);
    if current_block <= deadline {
        return Some(RevealCountdown::ClosesIn(deadline - current_block));
    }
    None
}
