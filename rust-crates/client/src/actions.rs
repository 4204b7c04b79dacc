use crate::{
    ledger::WriteCall,
    pool::{
        MAX_TICKETS_PER_WALLET,
        Pool,
        PoolId,
        TicketId,
    },
    status::PoolStatus,
};
use web3::types::Address;

/// What the viewer holds in one pool.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ViewerHoldings {
    /// Purchases recorded by the contract, refunded tickets included.
    pub tickets_bought: u64,
    /// Tickets currently owned, ascending.
    pub owned: Vec<TicketId>,
    /// Owned tickets without a recorded claim.
    pub claimable: Vec<TicketId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Buy { max_quantity: u64 },
    Reveal,
    ClaimAll { tickets: Vec<TicketId> },
    CreatorWithdraw,
    RefundTickets { tickets: Vec<TicketId> },
    RefundCreator,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Buy { .. } => "buy",
            Action::Reveal => "reveal",
            Action::ClaimAll { .. } => "claim",
            Action::CreatorWithdraw => "withdraw",
            Action::RefundTickets { .. } => "refund",
            Action::RefundCreator => "refund-creator",
        }
    }
}

/// Everything `viewer` may do with `pool` under `status`. Without a viewer nothing is
/// permitted.
pub fn available_actions(
    pool: &Pool,
    status: PoolStatus,
    viewer: Option<Address>,
    holdings: &ViewerHoldings,
) -> Vec<Action> {
    let Some(viewer) = viewer else {
        return Vec::new();
    };
    let is_creator = pool.is_created_by(&viewer);
    let mut actions = Vec::new();
    match status {
        PoolStatus::Open => {
            let max_quantity = MAX_TICKETS_PER_WALLET
                .saturating_sub(holdings.tickets_bought)
                .min(u64::from(pool.tickets_left()));
            if max_quantity > 0 {
                actions.push(Action::Buy { max_quantity });
            }
        }
        PoolStatus::ReadyToReveal if is_creator => actions.push(Action::Reveal),
        PoolStatus::Revealed => {
            if !holdings.claimable.is_empty() {
                actions.push(Action::ClaimAll {
                    tickets: holdings.claimable.clone(),
                });
            }
            if is_creator && !pool.creator_fee_withdrawn {
                actions.push(Action::CreatorWithdraw);
            }
        }
        PoolStatus::Expired | PoolStatus::RevealExpired => {
            if !holdings.owned.is_empty() {
                actions.push(Action::RefundTickets {
                    tickets: holdings.owned.clone(),
                });
            }
            if is_creator {
                actions.push(Action::RefundCreator);
            }
        }
        PoolStatus::ReadyToReveal | PoolStatus::SoldOutWaiting => {}
    }
    actions
}

/// Which pair of refund functions applies to a pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefundVariant {
    /// `refundTicket` / `refundCreator`, for pools that never sold out.
    Standard,
    /// `expiredPoolRefund` / `expiredPoolCreatorRefund`, for missed reveal windows.
    RevealExpired,
}

impl RefundVariant {
    pub fn for_status(status: PoolStatus) -> Option<Self> {
        match status {
            PoolStatus::RevealExpired => Some(RefundVariant::RevealExpired),
            PoolStatus::Expired => Some(RefundVariant::Standard),
            _ => None,
        }
    }

    pub fn ticket_call(self, pool_id: PoolId, ticket_id: TicketId) -> WriteCall {
        match self {
            RefundVariant::Standard => WriteCall::RefundTicket { pool_id, ticket_id },
            RefundVariant::RevealExpired => WriteCall::ExpiredPoolRefund { pool_id, ticket_id },
        }
    }

    pub fn creator_call(self, pool_id: PoolId) -> WriteCall {
        match self {
            RefundVariant::Standard => WriteCall::RefundCreator { pool_id },
            RefundVariant::RevealExpired => WriteCall::ExpiredPoolCreatorRefund { pool_id },
        }
    }
}

#[allow(non_snake_case)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolDetails;
    use web3::types::{
        H256,
        U256,
    };

    const CREATOR: Address = Address::repeat_byte(1);
    const ALICE: Address = Address::repeat_byte(0xa1);

    fn pool(tickets_sold: u8) -> Pool {
        Pool::from_parts(
            0,
            PoolDetails {
                creator: CREATOR,
                total_deposit: U256::exp10(18),
                ticket_price: U256::exp10(16),
                tickets_sold: tickets_sold.into(),
                is_revealed: false,
                commit_hash: H256::zero(),
                reveal_block: U256::zero(),
                creator_fee_withdrawn: false,
            },
            0.into(),
        )
        .unwrap()
    }

    fn holding(bought: u64, owned: &[TicketId]) -> ViewerHoldings {
        ViewerHoldings {
            tickets_bought: bought,
            owned: owned.to_vec(),
            claimable: owned.to_vec(),
        }
    }

    #[test]
    fn available_actions__no_viewer__is_empty() {
        let actions = available_actions(&pool(0), PoolStatus::Open, None, &holding(0, &[]));
        assert!(actions.is_empty());
    }

    #[test]
    fn available_actions__open__caps_purchase_at_wallet_limit() {
        // when
        let fresh = available_actions(&pool(0), PoolStatus::Open, Some(ALICE), &holding(0, &[]));
        let some = available_actions(&pool(0), PoolStatus::Open, Some(ALICE), &holding(7, &[]));
        let full = available_actions(&pool(0), PoolStatus::Open, Some(ALICE), &holding(10, &[]));

        // then
        assert_eq!(vec![Action::Buy { max_quantity: 10 }], fresh);
        assert_eq!(vec![Action::Buy { max_quantity: 3 }], some);
        assert!(full.is_empty());
    }

    #[test]
    fn available_actions__open__caps_purchase_at_tickets_left() {
        let actions =
            available_actions(&pool(98), PoolStatus::Open, Some(ALICE), &holding(0, &[]));
        assert_eq!(vec![Action::Buy { max_quantity: 2 }], actions);
    }

    #[test]
    fn available_actions__ready_to_reveal__only_for_creator() {
        let pool = pool(100);
        assert_eq!(
            vec![Action::Reveal],
            available_actions(&pool, PoolStatus::ReadyToReveal, Some(CREATOR), &holding(0, &[]))
        );
        assert!(
            available_actions(&pool, PoolStatus::ReadyToReveal, Some(ALICE), &holding(1, &[3]))
                .is_empty()
        );
    }

    #[test]
    fn available_actions__revealed__claim_and_creator_withdraw() {
        // given
        let mut pool = pool(100);
        pool.is_revealed = true;

        // when
        let holder =
            available_actions(&pool, PoolStatus::Revealed, Some(ALICE), &holding(2, &[4, 9]));
        let creator =
            available_actions(&pool, PoolStatus::Revealed, Some(CREATOR), &holding(0, &[]));
        pool.creator_fee_withdrawn = true;
        let withdrawn =
            available_actions(&pool, PoolStatus::Revealed, Some(CREATOR), &holding(0, &[]));

        // then
        assert_eq!(vec![Action::ClaimAll { tickets: vec![4, 9] }], holder);
        assert_eq!(vec![Action::CreatorWithdraw], creator);
        assert!(withdrawn.is_empty());
    }

    #[test]
    fn available_actions__expired__refunds_for_holders_and_creator() {
        // given
        let pool = pool(40);

        // when
        let holder =
            available_actions(&pool, PoolStatus::Expired, Some(ALICE), &holding(2, &[1, 2]));
        let creator =
            available_actions(&pool, PoolStatus::RevealExpired, Some(CREATOR), &holding(0, &[]));

        // then
        assert_eq!(vec![Action::RefundTickets { tickets: vec![1, 2] }], holder);
        assert_eq!(vec![Action::RefundCreator], creator);
    }

    #[test]
    fn available_actions__sold_out_waiting__nothing_to_do() {
        let actions =
            available_actions(&pool(100), PoolStatus::SoldOutWaiting, Some(CREATOR), &holding(1, &[0]));
        assert!(actions.is_empty());
    }

    #[test]
    fn refund_variant__follows_status() {
        assert_eq!(
            Some(RefundVariant::RevealExpired),
            RefundVariant::for_status(PoolStatus::RevealExpired)
        );
        assert_eq!(
            Some(RefundVariant::Standard),
            RefundVariant::for_status(PoolStatus::Expired)
        );
        assert_eq!(None, RefundVariant::for_status(PoolStatus::Open));
        assert_eq!(
            WriteCall::ExpiredPoolRefund {
                pool_id: 3,
                ticket_id: 7
            },
            RefundVariant::RevealExpired.ticket_call(3, 7)
        );
        assert_eq!(
            WriteCall::RefundCreator { pool_id: 3 },
            RefundVariant::Standard.creator_call(3)
        );
    }
}
