//! Submits writes, follows them to confirmation and sequences bulk refunds.
//!
//! Every write goes through the same path: the kind moves to `Pending`, the call is
//! submitted, and the receipt moves it to `Confirmed` or `Failed` (or `Stuck` when a
//! confirmation deadline is configured and passes). Only one write may be in flight per
//! orchestrator; a bulk refund holds the gate for its whole sequence.
use crate::{
    actions::RefundVariant,
    create::{
        DepositError,
        validate_deposit,
    },
    ledger::{
        Ledger,
        LedgerError,
        TxReceipt,
        WriteCall,
    },
    pool::{
        Pool,
        PoolId,
        TicketId,
    },
    secrets::{
        Secret,
        SecretStore,
        SecretStoreError,
        SecretVault,
    },
    status::PoolStatus,
};
use std::{
    sync::{
        Arc,
        Mutex,
        MutexGuard,
    },
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::{
    info,
    warn,
};
use web3::types::{
    H256,
    U256,
};

pub mod bulk_refund;
pub mod tracker;

pub use bulk_refund::{
    BulkProgress,
    BulkRefund,
    JobState,
};
pub use tracker::{
    Transition,
    WriteEffect,
    WriteKind,
    WriteState,
    WriteTracker,
};

#[cfg(test)]
mod tests;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OrchestratorEvent {
    Transition(Transition),
    Progress(BulkProgress),
    RefreshRequested { pool_id: Option<PoolId> },
}

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("another transaction is still pending")]
    Busy,
    #[error("{0}")]
    Rejected(String),
    #[error("transaction {0:?} reverted")]
    Reverted(H256),
    #[error("transaction {tx_hash:?} unconfirmed after {waited:?}; stuck, check it manually")]
    Stuck { tx_hash: H256, waited: Duration },
    #[error("secret for pool {0} not found; import it with `secret import {0} <hex>`")]
    SecretMissing(PoolId),
    #[error("secret does not match the commitment of pool {0}")]
    SecretMismatch(PoolId),
    #[error("{action} is not available for pool {pool_id} while it is {status}")]
    NotEligible {
        pool_id: PoolId,
        action: &'static str,
        status: PoolStatus,
    },
    #[error(transparent)]
    InvalidDeposit(#[from] DepositError),
    #[error("refund stopped after {completed}/{total}: {source}")]
    SequenceAborted {
        completed: usize,
        total: usize,
        #[source]
        source: Box<WriteError>,
    },
    #[error(transparent)]
    Ledger(LedgerError),
    #[error(transparent)]
    SecretStore(#[from] SecretStoreError),
}

impl From<LedgerError> for WriteError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Rejected(message) => WriteError::Rejected(message),
            other => WriteError::Ledger(other),
        }
    }
}

impl WriteError {
    /// First line of the message, which is all a user gets to see.
    pub fn user_message(&self) -> String {
        self.to_string()
            .lines()
            .next()
            .unwrap_or_default()
            .to_string()
    }
}

#[derive(Debug)]
pub enum CreationOutcome {
    /// The secret is stored under the new pool id.
    Stored { pool_id: PoolId, tx_hash: H256 },
    /// The pool exists but its id could not be read from the receipt. The secret has to
    /// be imported by hand once the id is known.
    PoolIdUnknown { tx_hash: H256, secret: Secret },
    /// The pool id is known but persisting the secret failed.
    StoreFailed {
        pool_id: PoolId,
        tx_hash: H256,
        secret: Secret,
        error: SecretStoreError,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BulkRefundSummary {
    pub pool_id: PoolId,
    pub refunded: Vec<TicketId>,
}

pub struct Orchestrator<L, S> {
    ledger: Arc<L>,
    vault: SecretVault<S>,
    tracker: Mutex<WriteTracker>,
    bulk: Mutex<Option<BulkRefund>>,
    confirmation_timeout: Option<Duration>,
    events: mpsc::UnboundedSender<OrchestratorEvent>,
}

/// Clears the bulk refund slot however the sequence ends.
struct BulkSlot<'a> {
    slot: &'a Mutex<Option<BulkRefund>>,
}

impl Drop for BulkSlot<'_> {
    fn drop(&mut self) {
        *lock(self.slot) = None;
    }
}

impl<L: Ledger, S: SecretStore> Orchestrator<L, S> {
    pub fn new(
        ledger: Arc<L>,
        vault: SecretVault<S>,
    ) -> (Self, mpsc::UnboundedReceiver<OrchestratorEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let orchestrator = Self {
            ledger,
            vault,
            tracker: Mutex::new(WriteTracker::new()),
            bulk: Mutex::new(None),
            confirmation_timeout: None,
            events,
        };
        (orchestrator, receiver)
    }

    pub fn with_confirmation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    pub fn vault(&self) -> &SecretVault<S> {
        &self.vault
    }

    pub fn write_state(&self, kind: WriteKind) -> WriteState {
        lock(&self.tracker).state(kind)
    }

    pub fn transitions(&self) -> Vec<Transition> {
        lock(&self.tracker).log().cloned().collect()
    }

    pub fn bulk_progress(&self) -> Option<BulkProgress> {
        lock(&self.bulk).as_ref().map(BulkRefund::progress)
    }

    /// Any write pending, or a bulk refund in progress.
    pub fn any_pending(&self) -> bool {
        lock(&self.tracker).any_pending() || lock(&self.bulk).is_some()
    }

    /// Admit a write: the idle check and the move to `Pending` share one tracker lock.
    fn begin(&self, kind: WriteKind, pool_id: Option<PoolId>) -> Result<(), WriteError> {
        let (transition, _) = {
            let mut tracker = lock(&self.tracker);
            if tracker.any_pending() || lock(&self.bulk).is_some() {
                return Err(WriteError::Busy);
            }
            tracker.apply(kind, WriteState::Pending, pool_id)
        };
        let _ = self.events.send(OrchestratorEvent::Transition(transition));
        Ok(())
    }

    /// Claim the bulk refund slot under the same locks `begin` checks.
    fn begin_bulk(&self, refund: BulkRefund) -> Result<BulkSlot<'_>, WriteError> {
        let tracker = lock(&self.tracker);
        let mut slot = lock(&self.bulk);
        if tracker.any_pending() || slot.is_some() {
            return Err(WriteError::Busy);
        }
        *slot = Some(refund);
        Ok(BulkSlot { slot: &self.bulk })
    }

    fn transition(&self, kind: WriteKind, to: WriteState, pool_id: Option<PoolId>) {
        let (transition, effect) = lock(&self.tracker).apply(kind, to, pool_id);
        let _ = self.events.send(OrchestratorEvent::Transition(transition));
        if let Some(WriteEffect::Refresh { pool_id }) = effect {
            let _ = self.events.send(OrchestratorEvent::RefreshRequested { pool_id });
        }
    }

    /// Submit one call and wait for its receipt. `kind` must already be `Pending`.
    async fn run_step(&self, kind: WriteKind, call: WriteCall) -> Result<TxReceipt, WriteError> {
        let pool_id = call.pool_id();
        let tx_hash = match self.ledger.submit_write(&call).await {
            Ok(tx_hash) => tx_hash,
            Err(err) => {
                warn!(%kind, ?pool_id, %err, "write rejected");
                self.transition(kind, WriteState::Failed, pool_id);
                return Err(err.into());
            }
        };

        let receipt = match self.confirmation_timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, self.ledger.wait_for_receipt(tx_hash)).await
                {
                    Ok(receipt) => receipt,
                    Err(_) => {
                        warn!(%kind, ?tx_hash, "no confirmation before deadline");
                        self.transition(kind, WriteState::Stuck, pool_id);
                        return Err(WriteError::Stuck {
                            tx_hash,
                            waited: limit,
                        });
                    }
                }
            }
            None => self.ledger.wait_for_receipt(tx_hash).await,
        };

        match receipt {
            Ok(receipt) if receipt.succeeded => {
                info!(%kind, ?pool_id, ?tx_hash, "write confirmed");
                self.transition(kind, WriteState::Confirmed, pool_id);
                Ok(receipt)
            }
            Ok(_) => {
                warn!(%kind, ?pool_id, ?tx_hash, "write reverted");
                self.transition(kind, WriteState::Failed, pool_id);
                Err(WriteError::Reverted(tx_hash))
            }
            Err(err) => {
                warn!(%kind, ?pool_id, ?tx_hash, %err, "receipt lookup failed");
                self.transition(kind, WriteState::Failed, pool_id);
                Err(err.into())
            }
        }
    }

    async fn single(&self, kind: WriteKind, call: WriteCall) -> Result<TxReceipt, WriteError> {
        self.begin(kind, call.pool_id())?;
        self.run_step(kind, call).await
    }

    /// Create a pool funded with the deposit entered as `deposit_text`.
    ///
    /// The secret is generated and committed in the same call and only persisted once
    /// the creation is confirmed and the new pool id is read from its `PoolCreated` log.
    pub async fn create_pool(&self, deposit_text: &str) -> Result<CreationOutcome, WriteError> {
        let deposit = validate_deposit(deposit_text)?;
        let secret = self.vault.generate();
        let commit_hash = self.vault.commitment_of(&secret);
        let receipt = self
            .single(
                WriteKind::Create,
                WriteCall::CreatePool {
                    commit_hash,
                    deposit,
                },
            )
            .await?;

        let Some(pool_id) = receipt.created_pool_id(self.ledger.contract()) else {
            warn!(tx_hash = ?receipt.tx_hash, "PoolCreated log missing; secret not stored");
            return Ok(CreationOutcome::PoolIdUnknown {
                tx_hash: receipt.tx_hash,
                secret,
            });
        };
        match self.vault.store(pool_id, &secret) {
            Ok(()) => Ok(CreationOutcome::Stored {
                pool_id,
                tx_hash: receipt.tx_hash,
            }),
            Err(error) => {
                warn!(pool_id, %error, "storing secret failed");
                Ok(CreationOutcome::StoreFailed {
                    pool_id,
                    tx_hash: receipt.tx_hash,
                    secret,
                    error,
                })
            }
        }
    }

    /// `buyTicket` for one ticket, `buyTickets` otherwise, paying `ticketPrice * quantity`.
    pub async fn buy(
        &self,
        pool: &Pool,
        status: PoolStatus,
        quantity: u64,
    ) -> Result<TxReceipt, WriteError> {
        if status != PoolStatus::Open || quantity == 0 || quantity > u64::from(pool.tickets_left())
        {
            return Err(not_eligible(pool, "buy", status));
        }
        let call = if quantity == 1 {
            WriteCall::BuyTicket {
                pool_id: pool.id,
                price: pool.ticket_price,
            }
        } else {
            WriteCall::BuyTickets {
                pool_id: pool.id,
                quantity,
                total_price: pool.ticket_price.saturating_mul(U256::from(quantity)),
            }
        };
        self.single(WriteKind::Buy, call).await
    }

    /// Disclose the stored secret. Fails locally when it is missing or does not match.
    pub async fn reveal(&self, pool: &Pool, status: PoolStatus) -> Result<TxReceipt, WriteError> {
        if status != PoolStatus::ReadyToReveal {
            return Err(not_eligible(pool, "reveal", status));
        }
        let secret = self
            .vault
            .retrieve(pool.id)?
            .ok_or(WriteError::SecretMissing(pool.id))?;
        if !self.vault.verify(pool, &secret) {
            return Err(WriteError::SecretMismatch(pool.id));
        }
        self.single(
            WriteKind::Reveal,
            WriteCall::RevealWinners {
                pool_id: pool.id,
                secret: secret.as_h256(),
            },
        )
        .await
    }

    pub async fn claim_all(
        &self,
        pool: &Pool,
        status: PoolStatus,
        tickets: &[TicketId],
    ) -> Result<TxReceipt, WriteError> {
        if status != PoolStatus::Revealed || tickets.is_empty() {
            return Err(not_eligible(pool, "claim", status));
        }
        self.single(
            WriteKind::Claim,
            WriteCall::ClaimPrizes {
                pool_id: pool.id,
                ticket_ids: tickets.to_vec(),
            },
        )
        .await
    }

    pub async fn creator_withdraw(
        &self,
        pool: &Pool,
        status: PoolStatus,
    ) -> Result<TxReceipt, WriteError> {
        if status != PoolStatus::Revealed {
            return Err(not_eligible(pool, "withdraw", status));
        }
        self.single(
            WriteKind::Withdraw,
            WriteCall::CreatorWithdraw { pool_id: pool.id },
        )
        .await
    }

    pub async fn refund_creator(
        &self,
        pool: &Pool,
        status: PoolStatus,
    ) -> Result<TxReceipt, WriteError> {
        let variant = RefundVariant::for_status(status)
            .ok_or_else(|| not_eligible(pool, "refund-creator", status))?;
        self.single(WriteKind::CreatorRefund, variant.creator_call(pool.id))
            .await
    }

    /// Refund `tickets` one transaction at a time, each confirmed before the next is
    /// submitted. The first failure stops the sequence; refunds already confirmed stay.
    pub async fn refund_tickets(
        &self,
        pool: &Pool,
        status: PoolStatus,
        tickets: &[TicketId],
    ) -> Result<BulkRefundSummary, WriteError> {
        let variant = RefundVariant::for_status(status)
            .ok_or_else(|| not_eligible(pool, "refund", status))?;
        if tickets.is_empty() {
            return Err(not_eligible(pool, "refund", status));
        }
        let _slot = self.begin_bulk(BulkRefund::new(pool.id, variant, tickets))?;

        loop {
            let next = lock(&self.bulk).as_mut().and_then(|bulk| {
                let progress = bulk.progress();
                bulk.start_next().map(|step| (step, progress))
            });
            let Some(((index, call), progress)) = next else {
                break;
            };
            let _ = self.events.send(OrchestratorEvent::Progress(progress));
            info!(
                pool_id = pool.id,
                step = progress.completed + 1,
                total = progress.total,
                "refunding ticket"
            );

            self.transition(WriteKind::TicketRefund, WriteState::Pending, Some(pool.id));
            let result = self.run_step(WriteKind::TicketRefund, call).await;
            let mut bulk = lock(&self.bulk);
            let Some(bulk) = bulk.as_mut() else {
                break;
            };
            bulk.finish(index, result.is_ok());
            if let Err(err) = result {
                return Err(WriteError::SequenceAborted {
                    completed: bulk.completed(),
                    total: bulk.total(),
                    source: Box::new(err),
                });
            }
        }

        let refunded = lock(&self.bulk)
            .as_ref()
            .map(BulkRefund::refunded)
            .unwrap_or_default();
        Ok(BulkRefundSummary {
            pool_id: pool.id,
            refunded,
        })
    }
}

fn not_eligible(pool: &Pool, action: &'static str, status: PoolStatus) -> WriteError {
    WriteError::NotEligible {
        pool_id: pool.id,
        action,
        status,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
