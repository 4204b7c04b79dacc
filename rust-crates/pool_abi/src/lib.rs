use std::sync::LazyLock;

use web3::{
    ethabi::{
        self,
        Contract,
        RawLog,
        Token,
    },
    types::{
        Address,
        H256,
        U256,
    },
};

/// Prize pool deployment on Monad testnet.
pub const DEFAULT_CONTRACT_ADDRESS: &str = "0x431786033Ea6c0B083378A9091DdDab452A92Ddc";

/// Multicall3 lives at the same address on every chain it is deployed to.
pub const DEFAULT_MULTICALL3_ADDRESS: &str = "0xcA11bde05977b3631167028862bE2a173976CA11";

const PRIZE_POOL_ABI: &str = include_str!("../abi/prize-pool-abi.json");
const MULTICALL3_ABI: &str = include_str!("../abi/multicall3-abi.json");

static PRIZE_POOL: LazyLock<Contract> = LazyLock::new(|| {
    Contract::load(PRIZE_POOL_ABI.as_bytes()).expect("embedded prize pool ABI is valid")
});

static MULTICALL3: LazyLock<Contract> = LazyLock::new(|| {
    Contract::load(MULTICALL3_ABI.as_bytes()).expect("embedded multicall3 ABI is valid")
});

pub mod functions {
    pub const CREATE_POOL: &str = "createPool";
    pub const BUY_TICKET: &str = "buyTicket";
    pub const BUY_TICKETS: &str = "buyTickets";
    pub const REVEAL_WINNERS: &str = "revealWinners";
    pub const CLAIM_PRIZES: &str = "claimPrizes";
    pub const CREATOR_WITHDRAW: &str = "creatorWithdraw";
    pub const REFUND_TICKET: &str = "refundTicket";
    pub const REFUND_CREATOR: &str = "refundCreator";
    pub const EXPIRED_POOL_REFUND: &str = "expiredPoolRefund";
    pub const EXPIRED_POOL_CREATOR_REFUND: &str = "expiredPoolCreatorRefund";

    pub const GET_POOL_DETAILS: &str = "getPoolDetails";
    pub const GET_POOL_CREATED_AT: &str = "getPoolCreatedAt";
    pub const GET_TICKET_OWNER: &str = "getTicketOwner";
    pub const GET_WINNER_TIER: &str = "getWinnerTier";
    pub const GET_TICKETS_BOUGHT_BY: &str = "getTicketsBoughtBy";
    pub const IS_CLAIMED: &str = "isClaimed";
    pub const CALCULATE_PRIZE_PREVIEW: &str = "calculatePrizePreview";
    pub const POOL_ID_COUNTER: &str = "poolIdCounter";

    pub const AGGREGATE3: &str = "aggregate3";
}

pub mod events {
    pub const POOL_CREATED: &str = "PoolCreated";
}

pub fn prize_pool() -> &'static Contract {
    &PRIZE_POOL
}

pub fn multicall3() -> &'static Contract {
    &MULTICALL3
}

/// ABI-encode a call to one of the prize pool functions.
pub fn encode_call(function: &str, args: &[Token]) -> ethabi::Result<Vec<u8>> {
    prize_pool().function(function)?.encode_input(args)
}

pub fn decode_output(function: &str, data: &[u8]) -> ethabi::Result<Vec<Token>> {
    prize_pool().function(function)?.decode_output(data)
}

/// Wrap `(target, calldata)` pairs into one `aggregate3` call. Every inner call is
/// allowed to fail on its own.
pub fn encode_aggregate3(calls: &[(Address, Vec<u8>)]) -> ethabi::Result<Vec<u8>> {
    let tuples = calls
        .iter()
        .map(|(target, data)| {
            Token::Tuple(vec![
                Token::Address(*target),
                Token::Bool(true),
                Token::Bytes(data.clone()),
            ])
        })
        .collect();
    multicall3()
        .function(functions::AGGREGATE3)?
        .encode_input(&[Token::Array(tuples)])
}

/// Decode the `(success, returnData)[]` produced by `aggregate3`, preserving call order.
pub fn decode_aggregate3(data: &[u8]) -> ethabi::Result<Vec<(bool, Vec<u8>)>> {
    let mut tokens = multicall3()
        .function(functions::AGGREGATE3)?
        .decode_output(data)?;
    let Some(Token::Array(results)) = tokens.pop() else {
        return Err(ethabi::Error::InvalidData);
    };
    results
        .into_iter()
        .map(|token| match token.into_tuple().as_deref() {
            Some([Token::Bool(success), Token::Bytes(bytes)]) => {
                Ok((*success, bytes.clone()))
            }
            _ => Err(ethabi::Error::InvalidData),
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolCreated {
    pub pool_id: U256,
    pub creator: Address,
    pub ticket_price: U256,
}

/// Decode a `PoolCreated` log. Returns `None` for logs of any other event or logs that
/// do not match the event layout.
pub fn decode_pool_created(topics: &[H256], data: &[u8]) -> Option<PoolCreated> {
    let event = prize_pool().event(events::POOL_CREATED).ok()?;
    if topics.first() != Some(&event.signature()) {
        return None;
    }
    let log = event
        .parse_log(RawLog {
            topics: topics.to_vec(),
            data: data.to_vec(),
        })
        .ok()?;
    let mut pool_id = None;
    let mut creator = None;
    let mut ticket_price = None;
    for param in log.params {
        match param.name.as_str() {
            "poolId" => pool_id = param.value.into_uint(),
            "creator" => creator = param.value.into_address(),
            "ticketPrice" => ticket_price = param.value.into_uint(),
            _ => {}
        }
    }
    Some(PoolCreated {
        pool_id: pool_id?,
        creator: creator?,
        ticket_price: ticket_price?,
    })
}

#[cfg(feature = "test-helpers")]
pub mod test_helpers;
