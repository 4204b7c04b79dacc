use crate::{
    events,
    prize_pool,
};
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

/// Build the `(topics, data)` pair the contract emits for `PoolCreated`.
pub fn pool_created_log(
    pool_id: U256,
    creator: Address,
    ticket_price: U256,
) -> (Vec<H256>, Vec<u8>) {
    let signature = prize_pool()
        .event(events::POOL_CREATED)
        .expect("PoolCreated is part of the ABI")
        .signature();
    let topics = vec![
        signature,
        H256::from_slice(&ethabi::encode(&[Token::Uint(pool_id)])),
        H256::from_slice(&ethabi::encode(&[Token::Address(creator)])),
    ];
    let data = ethabi::encode(&[Token::Uint(ticket_price)]);
    (topics, data)
}
