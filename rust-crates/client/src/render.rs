use crate::commands::PoolView;
use chrono::DateTime;
use deployments::DeploymentRecord;
use itertools::Itertools;
use prize_pool_client::{
    actions::Action,
    clock::ClockReading,
    create::CreationPreview,
    format::{
        format_mon,
        format_remaining,
        shorten_address,
    },
    orchestrator::{
        CreationOutcome,
        OrchestratorEvent,
        WriteState,
    },
    pool::{
        Pool,
        TICKETS_PER_POOL,
    },
    status::{
        PoolStatus,
        RevealCountdown,
        expires_at,
        reveal_countdown,
    },
    tickets::{
        Holding,
        SlotOwner,
        TicketSlots,
    },
};
use web3::types::{
    Address,
    U256,
};

pub const SECRET_STORAGE_WARNING: &str = "Warning: the reveal secret is stored only on \
this machine. Without it the pool cannot be revealed and will end in refunds. Back up \
the data directory or copy the secret with `prize-pool secret show <id>`.";

const GRID_WIDTH: usize = 10;

pub fn pool_table(rows: &[(Pool, PoolStatus)], clock: ClockReading) -> String {
    if rows.is_empty() {
        return "No pools yet.".to_string();
    }
    let header = format!(
        "{:>5}  {:<16}  {:>14}  {:>12}  {:>7}  {:<13}  {}",
        "Pool", "Status", "Deposit (MON)", "Ticket", "Sold", "Creator", "Timing"
    );
    let lines = rows.iter().map(|(pool, status)| {
        format!(
            "{:>5}  {:<16}  {:>14}  {:>12}  {:>7}  {:<13}  {}",
            format!("#{}", pool.id),
            status.label(),
            format_mon(pool.total_deposit),
            format_mon(pool.ticket_price),
            format!("{}/{}", pool.tickets_sold, TICKETS_PER_POOL),
            shorten_address(&pool.creator),
            timing(pool, *status, clock),
        )
    });
    std::iter::once(header).chain(lines).join("\n")
}

fn timing(pool: &Pool, status: PoolStatus, clock: ClockReading) -> String {
    match (status, reveal_countdown(pool, clock.block)) {
        (PoolStatus::SoldOutWaiting, Some(RevealCountdown::OpensIn(blocks))) => {
            format!("reveal opens in {blocks} blocks")
        }
        (PoolStatus::ReadyToReveal, Some(RevealCountdown::ClosesIn(blocks))) => {
            format!("reveal closes in {blocks} blocks")
        }
        (PoolStatus::Open, _) => {
            let left = expires_at(pool).saturating_sub(clock.timestamp);
            format!("{} left", format_remaining(saturating_u64(left)))
        }
        _ => String::new(),
    }
}

fn saturating_u64(value: U256) -> u64 {
    if value > U256::from(u64::MAX) {
        u64::MAX
    } else {
        value.low_u64()
    }
}

fn utc_time(timestamp: U256) -> String {
    i64::try_from(saturating_u64(timestamp))
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|time| time.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

pub fn pool_detail(view: &PoolView) -> String {
    let pool = &view.pool;
    let mut lines = vec![
        format!("Pool #{}  [{}]", pool.id, view.status.label()),
        format!("  Deposit       {} MON", format_mon(pool.total_deposit)),
        format!("  Ticket price  {} MON", format_mon(pool.ticket_price)),
        format!("  Tickets sold  {}/{}", pool.tickets_sold, TICKETS_PER_POOL),
        format!("  Creator       {}", shorten_address(&pool.creator)),
        format!("  Expires       {}", utc_time(expires_at(pool))),
    ];
    let timing = timing(pool, view.status, view.clock);
    if !timing.is_empty() {
        lines.push(format!("  Timing        {timing}"));
    }
    if view.viewer.is_some() {
        lines.push(format!(
            "  You bought    {} ticket(s), holding {}",
            view.holdings.tickets_bought,
            view.holdings.owned.len()
        ));
    }
    lines.push(String::new());
    lines.push(ticket_grid(&view.slots, view.viewer.as_ref()));

    let tiers = view.slots.assigned_tiers();
    if !tiers.is_empty() {
        lines.push(String::new());
        lines.push("Winners".to_string());
        lines.extend(
            tiers
                .iter()
                .filter(|(_, tier)| tier.0 > 1)
                .map(|(ticket, tier)| format!("  #{ticket:<3} {tier}")),
        );
    }

    lines.push(String::new());
    if view.actions.is_empty() {
        lines.push("No actions available.".to_string());
    } else {
        lines.push(format!(
            "Actions: {}",
            view.actions.iter().map(action_hint).join(", ")
        ));
    }
    lines.join("\n")
}

fn action_hint(action: &Action) -> String {
    match action {
        Action::Buy { max_quantity } => format!("buy (up to {max_quantity})"),
        Action::ClaimAll { tickets } => format!("claim ({} tickets)", tickets.len()),
        Action::RefundTickets { tickets } => format!("refund ({} tickets)", tickets.len()),
        other => other.name().to_string(),
    }
}

/// Ten rows of ten slots: `.` available, `x` sold, `Y` yours, `?` unreadable.
/// Revealed tickets of yours show their tier digit instead of `Y`.
pub fn ticket_grid(slots: &TicketSlots, viewer: Option<&Address>) -> String {
    slots
        .slots
        .chunks(GRID_WIDTH)
        .map(|row| {
            row.iter()
                .map(|slot| match &slot.owner {
                    SlotOwner::Unsold => ".".to_string(),
                    SlotOwner::Unknown => "?".to_string(),
                    SlotOwner::Owned(owner) if Some(owner) == viewer => match slot.tier {
                        Some(tier) if tier.is_assigned() => tier.0.to_string(),
                        _ => "Y".to_string(),
                    },
                    SlotOwner::Owned(_) => "x".to_string(),
                })
                .join(" ")
        })
        .join("\n")
}

pub fn holdings_table(pools: &[Pool], holdings: &[Holding], clock: ClockReading) -> String {
    if holdings.is_empty() {
        return "You have no tickets.".to_string();
    }
    holdings
        .iter()
        .filter_map(|holding| {
            let pool = pools.iter().find(|pool| pool.id == holding.pool_id)?;
            let status =
                prize_pool_client::status::derive_status(pool, clock.block, clock.timestamp);
            Some(format!(
                "#{:<5} {:<16} {} ticket(s) bought",
                pool.id,
                status.label(),
                holding.tickets_bought
            ))
        })
        .join("\n")
}

pub fn event_line(event: &OrchestratorEvent) -> Option<String> {
    match event {
        OrchestratorEvent::Transition(transition) => {
            let state = match transition.to {
                WriteState::Pending => "submitted, waiting for confirmation",
                WriteState::Confirmed => "confirmed",
                WriteState::Failed => "failed",
                WriteState::Stuck => "not confirmed in time",
                WriteState::Idle => return None,
            };
            Some(format!("{}: {state}", transition.kind))
        }
        OrchestratorEvent::Progress(progress) => Some(format!(
            "Refunding ticket {}/{}",
            progress.completed + 1,
            progress.total
        )),
        OrchestratorEvent::RefreshRequested { .. } => None,
    }
}

pub fn creation_preview(preview: &CreationPreview) -> String {
    [
        format!("Deposit       {} MON", format_mon(preview.deposit)),
        format!("Ticket price  {} MON", format_mon(preview.ticket_price)),
        format!("Prize pool    {} MON", format_mon(preview.prize_pool)),
        format!("Creator fee   {} MON", format_mon(preview.creator_fee)),
    ]
    .join("\n")
}

pub fn creation_outcome(outcome: &CreationOutcome) -> String {
    match outcome {
        CreationOutcome::Stored { pool_id, tx_hash } => {
            format!("Created pool #{pool_id} in {tx_hash:?}; secret stored.")
        }
        CreationOutcome::PoolIdUnknown { tx_hash, secret } => format!(
            "Pool created in {tx_hash:?}, but its id could not be read from the receipt.\n\
             The secret was NOT stored. Keep it and, once you know the pool id, run:\n  \
             prize-pool secret import <id> {}",
            secret.to_hex()
        ),
        CreationOutcome::StoreFailed {
            pool_id,
            tx_hash,
            secret,
            error,
        } => format!(
            "Created pool #{pool_id} in {tx_hash:?}, but storing the secret failed: {error}\n\
             Keep it and run:\n  prize-pool secret import {pool_id} {}",
            secret.to_hex()
        ),
    }
}

pub fn deployment(record: &DeploymentRecord) -> String {
    let optional = |value: Option<String>| value.unwrap_or_else(|| "-".to_string());
    [
        format!("Contract      {}", record.contract_address),
        format!("Multicall     {}", optional(record.multicall_address.clone())),
        format!("Network       {}", record.network_url),
        format!("Chain id      {}", optional(record.chain_id.map(|id| id.to_string()))),
        format!(
            "Deployed at   {}",
            optional(record.deployment_block_height.map(|h| h.to_string()))
        ),
        format!("Recorded      {}", record.recorded_at),
    ]
    .join("\n")
}
