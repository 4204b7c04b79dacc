//! Narrow view of the prize pool contract the rest of the client is written against.
//!
//! Everything that talks to a node goes through [`Ledger`]; the JSON-RPC implementation
//! lives in [`web3_ledger`], an in-memory one in `test_helpers`.
use crate::pool::{
    PoolDetails,
    PoolId,
    TicketId,
};
use pool_abi::functions;
use std::future::Future;
use web3::{
    ethabi::{
        self,
        Token,
    },
    types::{
        Address,
        H256,
        U256,
    },
};

pub mod web3_ledger;

pub use web3_ledger::Web3Ledger;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("rpc request failed: {0}")]
    Rpc(String),
    #[error("call failed: {0}")]
    CallFailed(String),
    #[error("could not decode {function} output: {reason}")]
    Decode {
        function: &'static str,
        reason: String,
    },
    #[error("transaction rejected: {0}")]
    Rejected(String),
    #[error("no signing account configured")]
    NoSigner,
}

impl From<web3::Error> for LedgerError {
    fn from(err: web3::Error) -> Self {
        LedgerError::Rpc(err.to_string())
    }
}

impl From<ethabi::Error> for LedgerError {
    fn from(err: ethabi::Error) -> Self {
        LedgerError::CallFailed(err.to_string())
    }
}

/// One read-only contract call that can be folded into a batch.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ReadCall {
    PoolDetails(PoolId),
    PoolCreatedAt(PoolId),
    TicketOwner(PoolId, TicketId),
    WinnerTier(PoolId, TicketId),
    TicketsBoughtBy(PoolId, Address),
    IsClaimed(PoolId, TicketId),
    PrizePreview(PoolId, TicketId),
}

impl ReadCall {
    pub fn function_name(&self) -> &'static str {
        match self {
            ReadCall::PoolDetails(_) => functions::GET_POOL_DETAILS,
            ReadCall::PoolCreatedAt(_) => functions::GET_POOL_CREATED_AT,
            ReadCall::TicketOwner(..) => functions::GET_TICKET_OWNER,
            ReadCall::WinnerTier(..) => functions::GET_WINNER_TIER,
            ReadCall::TicketsBoughtBy(..) => functions::GET_TICKETS_BOUGHT_BY,
            ReadCall::IsClaimed(..) => functions::IS_CLAIMED,
            ReadCall::PrizePreview(..) => functions::CALCULATE_PRIZE_PREVIEW,
        }
    }

    pub fn pool_id(&self) -> PoolId {
        match self {
            ReadCall::PoolDetails(id)
            | ReadCall::PoolCreatedAt(id)
            | ReadCall::TicketOwner(id, _)
            | ReadCall::WinnerTier(id, _)
            | ReadCall::TicketsBoughtBy(id, _)
            | ReadCall::IsClaimed(id, _)
            | ReadCall::PrizePreview(id, _) => *id,
        }
    }

    pub fn args(&self) -> Vec<Token> {
        let pool = |id: &PoolId| Token::Uint(U256::from(*id));
        let ticket = |id: &TicketId| Token::Uint(U256::from(*id));
        match self {
            ReadCall::PoolDetails(id) | ReadCall::PoolCreatedAt(id) => vec![pool(id)],
            ReadCall::TicketOwner(id, t)
            | ReadCall::WinnerTier(id, t)
            | ReadCall::IsClaimed(id, t)
            | ReadCall::PrizePreview(id, t) => vec![pool(id), ticket(t)],
            ReadCall::TicketsBoughtBy(id, buyer) => vec![pool(id), Token::Address(*buyer)],
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, LedgerError> {
        Ok(pool_abi::encode_call(self.function_name(), &self.args())?)
    }

    pub fn decode(&self, data: &[u8]) -> Result<ReadValue, LedgerError> {
        let function = self.function_name();
        let decode_err = |reason: &str| LedgerError::Decode {
            function,
            reason: reason.to_string(),
        };
        let tokens = pool_abi::decode_output(function, data)
            .map_err(|err| decode_err(&err.to_string()))?;
        match self {
            ReadCall::PoolDetails(_) => {
                let mut it = tokens.into_iter();
                let mut next = || it.next().ok_or_else(|| decode_err("missing field"));
                let creator = next()?.into_address().ok_or_else(|| decode_err("creator"))?;
                let total_deposit =
                    next()?.into_uint().ok_or_else(|| decode_err("totalDeposit"))?;
                let ticket_price =
                    next()?.into_uint().ok_or_else(|| decode_err("ticketPrice"))?;
                let tickets_sold =
                    next()?.into_uint().ok_or_else(|| decode_err("ticketsSold"))?;
                let is_revealed =
                    next()?.into_bool().ok_or_else(|| decode_err("isRevealed"))?;
                let commit_hash = next()?
                    .into_fixed_bytes()
                    .filter(|bytes| bytes.len() == 32)
                    .map(|bytes| H256::from_slice(&bytes))
                    .ok_or_else(|| decode_err("commitHash"))?;
                let reveal_block =
                    next()?.into_uint().ok_or_else(|| decode_err("revealBlock"))?;
                let creator_fee_withdrawn = next()?
                    .into_bool()
                    .ok_or_else(|| decode_err("creatorFeeWithdrawn"))?;
                Ok(ReadValue::Details(PoolDetails {
                    creator,
                    total_deposit,
                    ticket_price,
                    tickets_sold,
                    is_revealed,
                    commit_hash,
                    reveal_block,
                    creator_fee_withdrawn,
                }))
            }
            ReadCall::TicketOwner(..) => tokens
                .into_iter()
                .next()
                .and_then(Token::into_address)
                .map(ReadValue::Address)
                .ok_or_else(|| decode_err("expected address")),
            ReadCall::IsClaimed(..) => tokens
                .into_iter()
                .next()
                .and_then(Token::into_bool)
                .map(ReadValue::Bool)
                .ok_or_else(|| decode_err("expected bool")),
            ReadCall::PoolCreatedAt(_)
            | ReadCall::WinnerTier(..)
            | ReadCall::TicketsBoughtBy(..)
            | ReadCall::PrizePreview(..) => tokens
                .into_iter()
                .next()
                .and_then(Token::into_uint)
                .map(ReadValue::Uint)
                .ok_or_else(|| decode_err("expected uint256")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadValue {
    Details(PoolDetails),
    Uint(U256),
    Address(Address),
    Bool(bool),
}

impl ReadValue {
    pub fn into_details(self) -> Option<PoolDetails> {
        match self {
            ReadValue::Details(details) => Some(details),
            _ => None,
        }
    }

    pub fn into_uint(self) -> Option<U256> {
        match self {
            ReadValue::Uint(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_address(self) -> Option<Address> {
        match self {
            ReadValue::Address(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_bool(self) -> Option<bool> {
        match self {
            ReadValue::Bool(value) => Some(value),
            _ => None,
        }
    }
}

/// Outcome of one call inside a batch.
pub type ReadResult = Result<ReadValue, LedgerError>;

/// A state-changing contract call together with the value it pays.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteCall {
    CreatePool {
        commit_hash: H256,
        deposit: U256,
    },
    BuyTicket {
        pool_id: PoolId,
        price: U256,
    },
    BuyTickets {
        pool_id: PoolId,
        quantity: u64,
        total_price: U256,
    },
    RevealWinners {
        pool_id: PoolId,
        secret: H256,
    },
    ClaimPrizes {
        pool_id: PoolId,
        ticket_ids: Vec<TicketId>,
    },
    CreatorWithdraw {
        pool_id: PoolId,
    },
    RefundTicket {
        pool_id: PoolId,
        ticket_id: TicketId,
    },
    ExpiredPoolRefund {
        pool_id: PoolId,
        ticket_id: TicketId,
    },
    RefundCreator {
        pool_id: PoolId,
    },
    ExpiredPoolCreatorRefund {
        pool_id: PoolId,
    },
}

impl WriteCall {
    pub fn function_name(&self) -> &'static str {
        match self {
            WriteCall::CreatePool { .. } => functions::CREATE_POOL,
            WriteCall::BuyTicket { .. } => functions::BUY_TICKET,
            WriteCall::BuyTickets { .. } => functions::BUY_TICKETS,
            WriteCall::RevealWinners { .. } => functions::REVEAL_WINNERS,
            WriteCall::ClaimPrizes { .. } => functions::CLAIM_PRIZES,
            WriteCall::CreatorWithdraw { .. } => functions::CREATOR_WITHDRAW,
            WriteCall::RefundTicket { .. } => functions::REFUND_TICKET,
            WriteCall::ExpiredPoolRefund { .. } => functions::EXPIRED_POOL_REFUND,
            WriteCall::RefundCreator { .. } => functions::REFUND_CREATOR,
            WriteCall::ExpiredPoolCreatorRefund { .. } => {
                functions::EXPIRED_POOL_CREATOR_REFUND
            }
        }
    }

    pub fn pool_id(&self) -> Option<PoolId> {
        match self {
            WriteCall::CreatePool { .. } => None,
            WriteCall::BuyTicket { pool_id, .. }
            | WriteCall::BuyTickets { pool_id, .. }
            | WriteCall::RevealWinners { pool_id, .. }
            | WriteCall::ClaimPrizes { pool_id, .. }
            | WriteCall::CreatorWithdraw { pool_id }
            | WriteCall::RefundTicket { pool_id, .. }
            | WriteCall::ExpiredPoolRefund { pool_id, .. }
            | WriteCall::RefundCreator { pool_id }
            | WriteCall::ExpiredPoolCreatorRefund { pool_id } => Some(*pool_id),
        }
    }

    pub fn args(&self) -> Vec<Token> {
        let uint = |value: u64| Token::Uint(U256::from(value));
        match self {
            WriteCall::CreatePool { commit_hash, .. } => {
                vec![Token::FixedBytes(commit_hash.as_bytes().to_vec())]
            }
            WriteCall::BuyTicket { pool_id, .. }
            | WriteCall::CreatorWithdraw { pool_id }
            | WriteCall::RefundCreator { pool_id }
            | WriteCall::ExpiredPoolCreatorRefund { pool_id } => vec![uint(*pool_id)],
            WriteCall::BuyTickets {
                pool_id, quantity, ..
            } => vec![uint(*pool_id), uint(*quantity)],
            WriteCall::RevealWinners { pool_id, secret } => vec![
                uint(*pool_id),
                Token::FixedBytes(secret.as_bytes().to_vec()),
            ],
            WriteCall::ClaimPrizes {
                pool_id,
                ticket_ids,
            } => vec![
                uint(*pool_id),
                Token::Array(ticket_ids.iter().map(|t| uint(u64::from(*t))).collect()),
            ],
            WriteCall::RefundTicket { pool_id, ticket_id }
            | WriteCall::ExpiredPoolRefund { pool_id, ticket_id } => {
                vec![uint(*pool_id), uint(u64::from(*ticket_id))]
            }
        }
    }

    /// Native amount sent along with the call.
    pub fn value(&self) -> U256 {
        match self {
            WriteCall::CreatePool { deposit, .. } => *deposit,
            WriteCall::BuyTicket { price, .. } => *price,
            WriteCall::BuyTickets { total_price, .. } => *total_price,
            _ => U256::zero(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, LedgerError> {
        Ok(pool_abi::encode_call(self.function_name(), &self.args())?)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: H256,
    pub succeeded: bool,
    pub block_number: Option<u64>,
    pub logs: Vec<LogEntry>,
}

impl TxReceipt {
    /// Pool id announced by the first `PoolCreated` log emitted by `contract`, if any.
    pub fn created_pool_id(&self, contract: Address) -> Option<PoolId> {
        self.logs
            .iter()
            .filter(|log| log.address == contract)
            .filter_map(|log| pool_abi::decode_pool_created(&log.topics, &log.data))
            .find_map(|event| {
                (event.pool_id <= U256::from(u64::MAX)).then(|| event.pool_id.low_u64())
            })
    }
}

pub trait Ledger: Send + Sync {
    /// Signing account, if the client was started with a wallet.
    fn account(&self) -> Option<Address>;

    /// Address of the prize pool contract every call goes to.
    fn contract(&self) -> Address;

    /// Number of pools created so far; ids run from `0` to `count - 1`.
    fn pool_count(&self) -> impl Future<Output = Result<u64, LedgerError>> + Send;

    /// Issue every call as one combined request. The outer error means the whole batch
    /// failed; otherwise results line up with `calls` and fail independently.
    fn read_batch(
        &self,
        calls: &[ReadCall],
    ) -> impl Future<Output = Result<Vec<ReadResult>, LedgerError>> + Send;

    /// Validate and submit a write, returning its transaction hash.
    fn submit_write(
        &self,
        call: &WriteCall,
    ) -> impl Future<Output = Result<H256, LedgerError>> + Send;

    /// Resolve once the transaction is mined, successfully or not.
    fn wait_for_receipt(
        &self,
        tx_hash: H256,
    ) -> impl Future<Output = Result<TxReceipt, LedgerError>> + Send;

    fn current_block_height(&self) -> impl Future<Output = Result<U256, LedgerError>> + Send;

    fn current_block_timestamp(
        &self,
    ) -> impl Future<Output = Result<U256, LedgerError>> + Send;
}
