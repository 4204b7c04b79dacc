use std::fmt;
use web3::types::{
    Address,
    H256,
    U256,
};

pub type PoolId = u64;
pub type TicketId = u8;

pub const TICKETS_PER_POOL: u8 = 100;
pub const POOL_LIFETIME_SECS: u64 = 7 * 24 * 60 * 60;
pub const REVEAL_WINDOW_BLOCKS: u64 = 250;
pub const MAX_TICKETS_PER_WALLET: u64 = 10;

/// Raw `getPoolDetails` output, before validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolDetails {
    pub creator: Address,
    pub total_deposit: U256,
    pub ticket_price: U256,
    pub tickets_sold: U256,
    pub is_revealed: bool,
    pub commit_hash: H256,
    pub reveal_block: U256,
    pub creator_fee_withdrawn: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pool {
    pub id: PoolId,
    pub creator: Address,
    pub total_deposit: U256,
    pub ticket_price: U256,
    pub tickets_sold: u8,
    pub is_revealed: bool,
    pub commit_hash: H256,
    pub reveal_block: U256,
    pub creator_fee_withdrawn: bool,
    pub created_at: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolDecodeError {
    #[error("pool {id} reports {sold} tickets sold, more than {TICKETS_PER_POOL}")]
    TooManyTickets { id: PoolId, sold: U256 },
}

impl Pool {
    pub fn from_parts(
        id: PoolId,
        details: PoolDetails,
        created_at: U256,
    ) -> Result<Self, PoolDecodeError> {
        if details.tickets_sold > U256::from(TICKETS_PER_POOL) {
            return Err(PoolDecodeError::TooManyTickets {
                id,
                sold: details.tickets_sold,
            });
        }
        Ok(Self {
            id,
            creator: details.creator,
            total_deposit: details.total_deposit,
            ticket_price: details.ticket_price,
            tickets_sold: details.tickets_sold.low_u32() as u8,
            is_revealed: details.is_revealed,
            commit_hash: details.commit_hash,
            reveal_block: details.reveal_block,
            creator_fee_withdrawn: details.creator_fee_withdrawn,
            created_at,
        })
    }

    pub fn is_sold_out(&self) -> bool {
        self.tickets_sold == TICKETS_PER_POOL
    }

    pub fn tickets_left(&self) -> u8 {
        TICKETS_PER_POOL - self.tickets_sold
    }

    pub fn is_created_by(&self, account: &Address) -> bool {
        self.creator == *account
    }
}

/// Prize rank of a sold ticket after reveal. `0` means unsold or not evaluated.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tier(pub u8);

impl Tier {
    pub const NONE: Tier = Tier(0);
    pub const JACKPOT: Tier = Tier(5);

    pub fn from_raw(raw: U256) -> Self {
        if raw > U256::from(u8::MAX) {
            Tier(u8::MAX)
        } else {
            Tier(raw.low_u32() as u8)
        }
    }

    pub fn is_assigned(self) -> bool {
        (1..=5).contains(&self.0)
    }

    pub fn label(self) -> String {
        match self.0 {
            5 => "Jackpot".to_string(),
            4 => "High".to_string(),
            3 => "Medium".to_string(),
            2 => "Consolation".to_string(),
            1 => "Loser".to_string(),
            other => format!("Tier {other}"),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[allow(non_snake_case)]
#[cfg(test)]
mod tests {
    use super::*;

    fn details(tickets_sold: u64) -> PoolDetails {
        PoolDetails {
            creator: Address::repeat_byte(1),
            total_deposit: U256::exp10(18),
            ticket_price: U256::exp10(16),
            tickets_sold: tickets_sold.into(),
            is_revealed: false,
            commit_hash: H256::repeat_byte(2),
            reveal_block: U256::zero(),
            creator_fee_withdrawn: false,
        }
    }

    #[test]
    fn from_parts__keeps_all_fields() {
        // when
        let pool = Pool::from_parts(3, details(40), 1_000.into()).unwrap();

        // then
        assert_eq!(pool.id, 3);
        assert_eq!(pool.tickets_sold, 40);
        assert_eq!(pool.tickets_left(), 60);
        assert_eq!(pool.created_at, U256::from(1_000));
        assert!(pool.is_created_by(&Address::repeat_byte(1)));
    }

    #[test]
    fn from_parts__rejects_more_than_one_hundred_tickets() {
        // when
        let result = Pool::from_parts(3, details(101), 0.into());

        // then
        assert_eq!(
            result,
            Err(PoolDecodeError::TooManyTickets {
                id: 3,
                sold: 101.into()
            })
        );
    }

    #[test]
    fn tier_label__covers_known_and_unknown_tiers() {
        assert_eq!(Tier(5).label(), "Jackpot");
        assert_eq!(Tier(1).label(), "Loser");
        assert_eq!(Tier(0).label(), "Tier 0");
        assert_eq!(Tier::from_raw(U256::from(300)).label(), "Tier 255");
    }
}
