use crate::pool::PoolId;
use std::{
    collections::VecDeque,
    fmt,
};

const DEFAULT_LOG_CAPACITY: usize = 64;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WriteKind {
    Create,
    Buy,
    Reveal,
    Claim,
    Withdraw,
    TicketRefund,
    CreatorRefund,
}

impl WriteKind {
    pub const ALL: [WriteKind; 7] = [
        WriteKind::Create,
        WriteKind::Buy,
        WriteKind::Reveal,
        WriteKind::Claim,
        WriteKind::Withdraw,
        WriteKind::TicketRefund,
        WriteKind::CreatorRefund,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            WriteKind::Create => "create",
            WriteKind::Buy => "buy",
            WriteKind::Reveal => "reveal",
            WriteKind::Claim => "claim",
            WriteKind::Withdraw => "withdraw",
            WriteKind::TicketRefund => "ticket-refund",
            WriteKind::CreatorRefund => "creator-refund",
        }
    }
}

impl fmt::Display for WriteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum WriteState {
    #[default]
    Idle,
    Pending,
    Confirmed,
    Failed,
    /// No confirmation before the deadline. Does not block new writes.
    Stuck,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub kind: WriteKind,
    pub from: WriteState,
    pub to: WriteState,
    pub pool_id: Option<PoolId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteEffect {
    /// Re-read the given pool, or only the list when `None`, and the pool list.
    Refresh { pool_id: Option<PoolId> },
}

/// One state machine per write kind plus a bounded log of every transition.
///
/// The refresh effect is attached to the `Pending -> Confirmed` edge only, so a write
/// that stays confirmed never asks for another refresh.
#[derive(Clone, Debug)]
pub struct WriteTracker {
    states: [WriteState; WriteKind::ALL.len()],
    log: VecDeque<Transition>,
    log_capacity: usize,
}

impl Default for WriteTracker {
    fn default() -> Self {
        Self::with_log_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl WriteTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log_capacity(log_capacity: usize) -> Self {
        Self {
            states: [WriteState::Idle; WriteKind::ALL.len()],
            log: VecDeque::with_capacity(log_capacity),
            log_capacity,
        }
    }

    pub fn state(&self, kind: WriteKind) -> WriteState {
        self.states[kind.index()]
    }

    pub fn is_pending(&self, kind: WriteKind) -> bool {
        self.state(kind) == WriteState::Pending
    }

    pub fn any_pending(&self) -> bool {
        self.states.contains(&WriteState::Pending)
    }

    pub fn apply(
        &mut self,
        kind: WriteKind,
        to: WriteState,
        pool_id: Option<PoolId>,
    ) -> (Transition, Option<WriteEffect>) {
        let from = std::mem::replace(&mut self.states[kind.index()], to);
        let transition = Transition {
            kind,
            from,
            to,
            pool_id,
        };
        if self.log_capacity > 0 {
            if self.log.len() == self.log_capacity {
                self.log.pop_front();
            }
            self.log.push_back(transition.clone());
        }
        let effect = (from == WriteState::Pending && to == WriteState::Confirmed)
            .then_some(WriteEffect::Refresh { pool_id });
        (transition, effect)
    }

    pub fn log(&self) -> impl Iterator<Item = &Transition> {
        self.log.iter()
    }
}
