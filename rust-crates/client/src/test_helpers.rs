//! In-memory stand-in for the prize pool contract.
//!
//! Reads and writes follow the contract's observable behaviour closely enough for the
//! client logic: pools get sequential ids, purchases assign ticket slots, refunds clear
//! ownership and reveals check the commitment. Failures, reverts and hanging
//! confirmations can be scripted, and every call is logged.
use crate::{
    ledger::{
        Ledger,
        LedgerError,
        LogEntry,
        ReadCall,
        ReadResult,
        ReadValue,
        TxReceipt,
        WriteCall,
    },
    orchestrator::{
        Orchestrator,
        OrchestratorEvent,
    },
    pool::{
        Pool,
        PoolDetails,
        PoolId,
        TICKETS_PER_POOL,
        TicketId,
    },
    secrets::{
        InMemorySecretStore,
        Secret,
        SecretVault,
        commitment_of,
    },
    status::{
        PoolStatus,
        derive_status,
    },
};
use std::{
    collections::{
        HashMap,
        HashSet,
        VecDeque,
    },
    sync::{
        Arc,
        Mutex,
    },
    time::Duration,
};
use tokio::sync::mpsc;
use web3::types::{
    Address,
    H256,
    U256,
};

/// Blocks between the last ticket sale and the opening of the reveal window.
pub const FAKE_REVEAL_DELAY: u64 = 10;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Apply the call; it reverts only if the fake contract refuses it.
    Confirm,
    /// Fail at submission with the given message.
    Reject(String),
    /// Mine the transaction with a failed status.
    Revert,
    /// Accept the transaction but never produce a receipt.
    Hang,
}

#[derive(Clone, Debug)]
pub struct FakePool {
    pub details: PoolDetails,
    pub created_at: U256,
    pub owners: Vec<Address>,
    pub tiers: Vec<u8>,
    pub claimed: Vec<bool>,
    pub creator_refunded: bool,
}

impl FakePool {
    pub fn new(creator: Address, deposit: U256, created_at: U256) -> Self {
        let slots = TICKETS_PER_POOL as usize;
        Self {
            details: PoolDetails {
                creator,
                total_deposit: deposit,
                ticket_price: deposit / 100,
                tickets_sold: U256::zero(),
                is_revealed: false,
                commit_hash: H256::zero(),
                reveal_block: U256::zero(),
                creator_fee_withdrawn: false,
            },
            created_at,
            owners: vec![Address::zero(); slots],
            tiers: vec![0; slots],
            claimed: vec![false; slots],
            creator_refunded: false,
        }
    }

    pub fn with_commit(mut self, commit_hash: H256) -> Self {
        self.details.commit_hash = commit_hash;
        self
    }

    /// Sell the next `count` slots to `buyer`.
    pub fn with_tickets(mut self, buyer: Address, count: u8) -> Self {
        let sold = self.sold();
        for slot in sold..sold + count as usize {
            self.owners[slot] = buyer;
        }
        self.details.tickets_sold = U256::from(sold + count as usize);
        self
    }

    pub fn with_reveal_block(mut self, block: u64) -> Self {
        self.details.reveal_block = block.into();
        self
    }

    pub fn revealed(mut self, tiers: &[(TicketId, u8)]) -> Self {
        self.details.is_revealed = true;
        for (ticket, tier) in tiers {
            self.tiers[*ticket as usize] = *tier;
        }
        self
    }

    pub fn sold(&self) -> usize {
        self.details.tickets_sold.low_u64() as usize
    }

    pub fn tickets_bought_by(&self, buyer: &Address) -> u64 {
        self.owners.iter().filter(|owner| *owner == buyer).count() as u64
    }
}

enum PendingTx {
    Mined(TxReceipt),
    Hanging,
}

struct FakeState {
    pools: Vec<FakePool>,
    block: U256,
    timestamp: U256,
    pool_count_error: Option<LedgerError>,
    failing_pools: HashSet<PoolId>,
    failing_batches: HashSet<usize>,
    batch_log: Vec<Vec<ReadCall>>,
    write_log: Vec<WriteCall>,
    outcomes: VecDeque<WriteOutcome>,
    pending: HashMap<H256, PendingTx>,
    next_tx: u64,
    omit_creation_event: bool,
    read_latency: Option<Duration>,
    pool_count_calls: usize,
}

/// Address the fake contract emits its logs from.
pub const FAKE_CONTRACT: Address = Address::repeat_byte(0x9f);

#[derive(Clone)]
pub struct FakeLedger {
    state: Arc<Mutex<FakeState>>,
    account: Option<Address>,
}

impl FakeLedger {
    pub fn new(account: Address) -> Self {
        Self::with_account(Some(account))
    }

    pub fn read_only() -> Self {
        Self::with_account(None)
    }

    /// Another signer on the same simulated chain.
    pub fn as_account(&self, account: Address) -> Self {
        Self {
            state: self.state.clone(),
            account: Some(account),
        }
    }

    fn with_account(account: Option<Address>) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                pools: Vec::new(),
                block: U256::from(1),
                timestamp: U256::from(1_700_000_000u64),
                pool_count_error: None,
                failing_pools: HashSet::new(),
                failing_batches: HashSet::new(),
                batch_log: Vec::new(),
                write_log: Vec::new(),
                outcomes: VecDeque::new(),
                pending: HashMap::new(),
                next_tx: 1,
                omit_creation_event: false,
                read_latency: None,
                pool_count_calls: 0,
            })),
            account,
        }
    }

    pub fn add_pool(&self, pool: FakePool) -> PoolId {
        let mut state = self.state.lock().unwrap();
        state.pools.push(pool);
        (state.pools.len() - 1) as PoolId
    }

    pub fn pool(&self, pool_id: PoolId) -> FakePool {
        self.state.lock().unwrap().pools[pool_id as usize].clone()
    }

    pub fn ticket_owner(&self, pool_id: PoolId, ticket: TicketId) -> Address {
        self.pool(pool_id).owners[ticket as usize]
    }

    pub fn set_block(&self, block: u64) {
        self.state.lock().unwrap().block = block.into();
    }

    pub fn set_timestamp(&self, timestamp: u64) {
        self.state.lock().unwrap().timestamp = timestamp.into();
    }

    pub fn fail_reads_for(&self, pool_id: PoolId) {
        self.state.lock().unwrap().failing_pools.insert(pool_id);
    }

    /// Fail the `index`-th `read_batch` call (0-based) as a whole.
    pub fn fail_batch(&self, index: usize) {
        self.state.lock().unwrap().failing_batches.insert(index);
    }

    pub fn fail_pool_count(&self, error: Option<LedgerError>) {
        self.state.lock().unwrap().pool_count_error = error;
    }

    /// Queue the outcome of the next write; unscripted writes confirm.
    pub fn script_write(&self, outcome: WriteOutcome) {
        self.state.lock().unwrap().outcomes.push_back(outcome);
    }

    pub fn omit_creation_event(&self) {
        self.state.lock().unwrap().omit_creation_event = true;
    }

    pub fn set_read_latency(&self, latency: Duration) {
        self.state.lock().unwrap().read_latency = Some(latency);
    }

    pub fn write_log(&self) -> Vec<WriteCall> {
        self.state.lock().unwrap().write_log.clone()
    }

    pub fn batch_log(&self) -> Vec<Vec<ReadCall>> {
        self.state.lock().unwrap().batch_log.clone()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_log().iter().map(Vec::len).collect()
    }

    pub fn pool_count_calls(&self) -> usize {
        self.state.lock().unwrap().pool_count_calls
    }

    fn read_latency(&self) -> Option<Duration> {
        self.state.lock().unwrap().read_latency
    }
}

impl FakeState {
    fn read(&self, call: &ReadCall) -> ReadResult {
        if self.failing_pools.contains(&call.pool_id()) {
            return Err(LedgerError::CallFailed(format!(
                "{} reverted",
                call.function_name()
            )));
        }
        let pool = self
            .pools
            .get(call.pool_id() as usize)
            .ok_or_else(|| LedgerError::CallFailed("pool does not exist".to_string()))?;
        let slot = |ticket: &TicketId| {
            if *ticket < TICKETS_PER_POOL {
                Ok(*ticket as usize)
            } else {
                Err(LedgerError::CallFailed("invalid ticket id".to_string()))
            }
        };
        Ok(match call {
            ReadCall::PoolDetails(_) => ReadValue::Details(pool.details.clone()),
            ReadCall::PoolCreatedAt(_) => ReadValue::Uint(pool.created_at),
            ReadCall::TicketOwner(_, ticket) => ReadValue::Address(pool.owners[slot(ticket)?]),
            ReadCall::WinnerTier(_, ticket) => {
                ReadValue::Uint(pool.tiers[slot(ticket)?].into())
            }
            ReadCall::TicketsBoughtBy(_, buyer) => {
                ReadValue::Uint(pool.tickets_bought_by(buyer).into())
            }
            ReadCall::IsClaimed(_, ticket) => ReadValue::Bool(pool.claimed[slot(ticket)?]),
            ReadCall::PrizePreview(_, ticket) => {
                let tier = pool.tiers[slot(ticket)?];
                ReadValue::Uint(pool.details.ticket_price * U256::from(tier))
            }
        })
    }

    /// Apply a confirmed write. `Err` means the fake contract reverts it.
    fn apply(&mut self, sender: Address, call: &WriteCall) -> Result<Vec<LogEntry>, ()> {
        let block = self.block;
        if let WriteCall::CreatePool {
            commit_hash,
            deposit,
        } = call
        {
            let pool = FakePool::new(sender, *deposit, self.timestamp).with_commit(*commit_hash);
            self.pools.push(pool);
            let pool_id = U256::from(self.pools.len() - 1);
            if self.omit_creation_event {
                return Ok(Vec::new());
            }
            let (topics, data) =
                pool_abi::test_helpers::pool_created_log(pool_id, sender, *deposit / 100);
            return Ok(vec![LogEntry {
                address: FAKE_CONTRACT,
                topics,
                data,
            }]);
        }

        let pool_id = call.pool_id().ok_or(())? as usize;
        let pool = self.pools.get_mut(pool_id).ok_or(())?;
        match call {
            WriteCall::CreatePool { .. } => unreachable!("handled above"),
            WriteCall::BuyTicket { .. } | WriteCall::BuyTickets { .. } => {
                let quantity = match call {
                    WriteCall::BuyTickets { quantity, .. } => *quantity as usize,
                    _ => 1,
                };
                let sold = pool.sold();
                if sold + quantity > TICKETS_PER_POOL as usize || pool.details.is_revealed {
                    return Err(());
                }
                for slot in sold..sold + quantity {
                    pool.owners[slot] = sender;
                }
                pool.details.tickets_sold = U256::from(sold + quantity);
                if sold + quantity == TICKETS_PER_POOL as usize {
                    pool.details.reveal_block = block + U256::from(FAKE_REVEAL_DELAY);
                }
            }
            WriteCall::RevealWinners { secret, .. } => {
                let secret = Secret::from_bytes(secret.to_fixed_bytes());
                if pool.details.is_revealed || commitment_of(&secret) != pool.details.commit_hash
                {
                    return Err(());
                }
                pool.details.is_revealed = true;
                for (slot, tier) in pool.tiers.iter_mut().enumerate() {
                    *tier = if slot == 0 { 5 } else { 1 };
                }
            }
            WriteCall::ClaimPrizes { ticket_ids, .. } => {
                if !pool.details.is_revealed {
                    return Err(());
                }
                for ticket in ticket_ids {
                    let slot = *ticket as usize;
                    if pool.owners.get(slot) != Some(&sender) || pool.claimed[slot] {
                        return Err(());
                    }
                }
                for ticket in ticket_ids {
                    pool.claimed[*ticket as usize] = true;
                }
            }
            WriteCall::CreatorWithdraw { .. } => {
                if pool.details.creator != sender || pool.details.creator_fee_withdrawn {
                    return Err(());
                }
                pool.details.creator_fee_withdrawn = true;
            }
            WriteCall::RefundTicket { ticket_id, .. }
            | WriteCall::ExpiredPoolRefund { ticket_id, .. } => {
                let slot = *ticket_id as usize;
                if pool.owners.get(slot) != Some(&sender) {
                    return Err(());
                }
                pool.owners[slot] = Address::zero();
            }
            WriteCall::RefundCreator { .. } | WriteCall::ExpiredPoolCreatorRefund { .. } => {
                if pool.details.creator != sender || pool.creator_refunded {
                    return Err(());
                }
                pool.creator_refunded = true;
            }
        }
        Ok(Vec::new())
    }
}

impl Ledger for FakeLedger {
    fn account(&self) -> Option<Address> {
        self.account
    }

    fn contract(&self) -> Address {
        FAKE_CONTRACT
    }

    async fn pool_count(&self) -> Result<u64, LedgerError> {
        let mut state = self.state.lock().unwrap();
        state.pool_count_calls += 1;
        match &state.pool_count_error {
            Some(err) => Err(err.clone()),
            None => Ok(state.pools.len() as u64),
        }
    }

    async fn read_batch(&self, calls: &[ReadCall]) -> Result<Vec<ReadResult>, LedgerError> {
        if let Some(latency) = self.read_latency() {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state.lock().unwrap();
        let index = state.batch_log.len();
        state.batch_log.push(calls.to_vec());
        if state.failing_batches.contains(&index) {
            return Err(LedgerError::Rpc("rate limited".to_string()));
        }
        Ok(calls.iter().map(|call| state.read(call)).collect())
    }

    async fn submit_write(&self, call: &WriteCall) -> Result<H256, LedgerError> {
        let sender = self.account.ok_or(LedgerError::NoSigner)?;
        let mut state = self.state.lock().unwrap();
        state.write_log.push(call.clone());
        let outcome = state.outcomes.pop_front().unwrap_or(WriteOutcome::Confirm);
        let tx_hash = H256::from_low_u64_be(state.next_tx);
        state.next_tx += 1;
        let block_number = Some(state.block.low_u64());
        let pending = match outcome {
            WriteOutcome::Reject(message) => return Err(LedgerError::Rejected(message)),
            WriteOutcome::Hang => PendingTx::Hanging,
            WriteOutcome::Revert => PendingTx::Mined(TxReceipt {
                tx_hash,
                succeeded: false,
                block_number,
                logs: Vec::new(),
            }),
            WriteOutcome::Confirm => {
                let applied = state.apply(sender, call);
                PendingTx::Mined(TxReceipt {
                    tx_hash,
                    succeeded: applied.is_ok(),
                    block_number,
                    logs: applied.unwrap_or_default(),
                })
            }
        };
        state.pending.insert(tx_hash, pending);
        Ok(tx_hash)
    }

    async fn wait_for_receipt(&self, tx_hash: H256) -> Result<TxReceipt, LedgerError> {
        let receipt = {
            let state = self.state.lock().unwrap();
            match state.pending.get(&tx_hash) {
                Some(PendingTx::Mined(receipt)) => Some(receipt.clone()),
                Some(PendingTx::Hanging) => None,
                None => {
                    return Err(LedgerError::Rpc(format!("unknown transaction {tx_hash:?}")));
                }
            }
        };
        match receipt {
            Some(receipt) => Ok(receipt),
            None => std::future::pending().await,
        }
    }

    async fn current_block_height(&self) -> Result<U256, LedgerError> {
        Ok(self.state.lock().unwrap().block)
    }

    async fn current_block_timestamp(&self) -> Result<U256, LedgerError> {
        Ok(self.state.lock().unwrap().timestamp)
    }
}

/// One simulated chain shared by a creator and two players, each with a secret store.
pub struct TestContext {
    chain: FakeLedger,
    stores: HashMap<Address, InMemorySecretStore>,
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TestContext {
    pub fn new() -> Self {
        let stores = [Self::creator(), Self::alice(), Self::bob()]
            .into_iter()
            .map(|account| (account, InMemorySecretStore::new()))
            .collect();
        Self {
            chain: FakeLedger::read_only(),
            stores,
        }
    }

    pub fn creator() -> Address {
        Address::repeat_byte(0xc0)
    }

    pub fn alice() -> Address {
        Address::repeat_byte(0xa1)
    }

    pub fn bob() -> Address {
        Address::repeat_byte(0xb0)
    }

    /// Read-only view of the chain, also used to script failures and move clocks.
    pub fn chain(&self) -> &FakeLedger {
        &self.chain
    }

    pub fn ledger_for(&self, account: Address) -> FakeLedger {
        self.chain.as_account(account)
    }

    /// Orchestrator signing as `account`, backed by that account's secret store.
    pub fn orchestrator_for(
        &self,
        account: Address,
    ) -> (
        Orchestrator<FakeLedger, InMemorySecretStore>,
        mpsc::UnboundedReceiver<OrchestratorEvent>,
    ) {
        let store = self.stores.get(&account).cloned().unwrap_or_default();
        Orchestrator::new(Arc::new(self.ledger_for(account)), SecretVault::new(store))
    }

    pub fn pool(&self, pool_id: PoolId) -> Pool {
        let fake = self.chain.pool(pool_id);
        Pool::from_parts(pool_id, fake.details, fake.created_at)
            .expect("fake pools never oversell")
    }

    pub async fn status(&self, pool_id: PoolId) -> PoolStatus {
        let block = self.chain.current_block_height().await.unwrap();
        let timestamp = self.chain.current_block_timestamp().await.unwrap();
        derive_status(&self.pool(pool_id), block, timestamp)
    }
}
