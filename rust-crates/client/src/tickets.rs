use crate::{
    ledger::{
        Ledger,
        LedgerError,
        ReadCall,
        ReadResult,
    },
    pool::{
        Pool,
        PoolId,
        TICKETS_PER_POOL,
        TicketId,
        Tier,
    },
};
use tracing::warn;
use web3::types::{
    Address,
    U256,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotOwner {
    Unsold,
    Owned(Address),
    /// The owner read failed.
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TicketSlot {
    pub id: TicketId,
    pub owner: SlotOwner,
    /// Only read once the pool is revealed.
    pub tier: Option<Tier>,
    pub claimed: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TicketSlots {
    pub pool_id: PoolId,
    pub slots: Vec<TicketSlot>,
}

impl TicketSlots {
    /// Ascending ids of the tickets held by `viewer`.
    pub fn owned_by(&self, viewer: &Address) -> Vec<TicketId> {
        self.slots
            .iter()
            .filter(|slot| slot.owner == SlotOwner::Owned(*viewer))
            .map(|slot| slot.id)
            .collect()
    }

    /// Owned tickets not yet known to be claimed.
    pub fn claimable_by(&self, viewer: &Address) -> Vec<TicketId> {
        self.slots
            .iter()
            .filter(|slot| slot.owner == SlotOwner::Owned(*viewer))
            .filter(|slot| slot.claimed != Some(true))
            .map(|slot| slot.id)
            .collect()
    }

    pub fn assigned_tiers(&self) -> Vec<(TicketId, Tier)> {
        self.slots
            .iter()
            .filter_map(|slot| match slot.tier {
                Some(tier) if tier.is_assigned() => Some((slot.id, tier)),
                _ => None,
            })
            .collect()
    }
}

/// Owner of every slot and, after reveal, tier and claim flag, in one batched read.
pub async fn load_ticket_slots<L: Ledger>(
    ledger: &L,
    pool: &Pool,
) -> Result<TicketSlots, LedgerError> {
    let ticket_ids: Vec<TicketId> = (0..TICKETS_PER_POOL).collect();
    let mut calls: Vec<ReadCall> = ticket_ids
        .iter()
        .map(|id| ReadCall::TicketOwner(pool.id, *id))
        .collect();
    if pool.is_revealed {
        calls.extend(ticket_ids.iter().map(|id| ReadCall::WinnerTier(pool.id, *id)));
        calls.extend(ticket_ids.iter().map(|id| ReadCall::IsClaimed(pool.id, *id)));
    }

    let results = ledger.read_batch(&calls).await?;
    let per_kind = TICKETS_PER_POOL as usize;
    let section = |index: usize| results.get(index * per_kind..(index + 1) * per_kind);
    let owners = section(0).unwrap_or_default();
    let tiers = section(1);
    let claimed = section(2);

    let slots = ticket_ids
        .iter()
        .map(|id| {
            let index = *id as usize;
            TicketSlot {
                id: *id,
                owner: owners.get(index).map(slot_owner).unwrap_or(SlotOwner::Unknown),
                tier: tiers
                    .and_then(|tiers| tiers.get(index))
                    .and_then(|result| result.clone().ok())
                    .and_then(|value| value.into_uint())
                    .map(Tier::from_raw),
                claimed: claimed
                    .and_then(|claimed| claimed.get(index))
                    .and_then(|result| result.clone().ok())
                    .and_then(|value| value.into_bool()),
            }
        })
        .collect();
    Ok(TicketSlots {
        pool_id: pool.id,
        slots,
    })
}

fn slot_owner(result: &ReadResult) -> SlotOwner {
    match result {
        Ok(value) => match value.clone().into_address() {
            Some(owner) if owner.is_zero() => SlotOwner::Unsold,
            Some(owner) => SlotOwner::Owned(owner),
            None => SlotOwner::Unknown,
        },
        Err(_) => SlotOwner::Unknown,
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Holding {
    pub pool_id: PoolId,
    pub tickets_bought: u64,
}

/// Purchase counts of `viewer` across `pools`, keeping only pools with purchases.
pub async fn load_holdings<L: Ledger>(
    ledger: &L,
    pools: &[Pool],
    viewer: Address,
) -> Result<Vec<Holding>, LedgerError> {
    let calls: Vec<ReadCall> = pools
        .iter()
        .map(|pool| ReadCall::TicketsBoughtBy(pool.id, viewer))
        .collect();
    let results = ledger.read_batch(&calls).await?;
    let mut holdings = Vec::new();
    for (pool, result) in pools.iter().zip(results) {
        match result.map(|value| value.into_uint()) {
            Ok(Some(count)) if !count.is_zero() => holdings.push(Holding {
                pool_id: pool.id,
                tickets_bought: count.min(U256::from(u64::MAX)).low_u64(),
            }),
            Ok(_) => {}
            Err(err) => warn!(pool_id = pool.id, %err, "ticket count read failed"),
        }
    }
    Ok(holdings)
}

/// Tickets `viewer` has bought in a single pool.
pub async fn tickets_bought_by<L: Ledger>(
    ledger: &L,
    pool_id: PoolId,
    viewer: Address,
) -> Result<u64, LedgerError> {
    let results = ledger
        .read_batch(&[ReadCall::TicketsBoughtBy(pool_id, viewer)])
        .await?;
    let value = results
        .into_iter()
        .next()
        .ok_or_else(|| LedgerError::CallFailed("empty batch result".to_string()))??;
    value
        .into_uint()
        .map(|count| count.min(U256::from(u64::MAX)).low_u64())
        .ok_or(LedgerError::Decode {
            function: pool_abi::functions::GET_TICKETS_BOUGHT_BY,
            reason: "expected uint256".to_string(),
        })
}
