#![allow(non_snake_case)]

use super::*;
use crate::{
    secrets::{
        InMemorySecretStore,
        commitment_of,
    },
    test_helpers::{
        FakeLedger,
        FakePool,
        WriteOutcome,
    },
};
use web3::types::Address;

fn viewer() -> Address {
    Address::repeat_byte(0xaa)
}

fn creator() -> Address {
    Address::repeat_byte(0xcc)
}

fn orchestrator(
    ledger: &FakeLedger,
) -> (
    Orchestrator<FakeLedger, InMemorySecretStore>,
    mpsc::UnboundedReceiver<OrchestratorEvent>,
    InMemorySecretStore,
) {
    let store = InMemorySecretStore::new();
    let (orchestrator, events) =
        Orchestrator::new(Arc::new(ledger.clone()), SecretVault::new(store.clone()));
    (orchestrator, events, store)
}

fn pool(ledger: &FakeLedger, pool_id: PoolId) -> Pool {
    let fake = ledger.pool(pool_id);
    Pool::from_parts(pool_id, fake.details, fake.created_at).unwrap()
}

fn drain(events: &mut mpsc::UnboundedReceiver<OrchestratorEvent>) -> Vec<OrchestratorEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn open_pool(ledger: &FakeLedger) -> Pool {
    let pool_id = ledger.add_pool(FakePool::new(creator(), U256::exp10(18), 0.into()));
    pool(ledger, pool_id)
}

#[tokio::test]
async fn buy__single_ticket__confirms_and_requests_one_refresh() {
    // given
    let ledger = FakeLedger::new(viewer());
    let pool = open_pool(&ledger);
    let (orchestrator, mut events, _) = orchestrator(&ledger);

    // when
    orchestrator.buy(&pool, PoolStatus::Open, 1).await.unwrap();

    // then
    assert_eq!(
        vec![WriteCall::BuyTicket {
            pool_id: pool.id,
            price: pool.ticket_price
        }],
        ledger.write_log()
    );
    assert_eq!(WriteState::Confirmed, orchestrator.write_state(WriteKind::Buy));
    let refreshes: Vec<_> = drain(&mut events)
        .into_iter()
        .filter(|event| matches!(event, OrchestratorEvent::RefreshRequested { .. }))
        .collect();
    assert_eq!(
        vec![OrchestratorEvent::RefreshRequested {
            pool_id: Some(pool.id)
        }],
        refreshes
    );
}

#[tokio::test]
async fn buy__several_tickets__pays_price_times_quantity() {
    // given
    let ledger = FakeLedger::new(viewer());
    let pool = open_pool(&ledger);
    let (orchestrator, _events, _) = orchestrator(&ledger);

    // when
    orchestrator.buy(&pool, PoolStatus::Open, 3).await.unwrap();

    // then
    assert_eq!(
        vec![WriteCall::BuyTickets {
            pool_id: pool.id,
            quantity: 3,
            total_price: pool.ticket_price * 3
        }],
        ledger.write_log()
    );
    assert_eq!(3, ledger.pool(pool.id).tickets_bought_by(&viewer()));
}

#[tokio::test]
async fn buy__while_another_write_is_pending__is_refused_without_submitting() {
    // given
    let ledger = FakeLedger::new(viewer());
    let pool = open_pool(&ledger);
    ledger.script_write(WriteOutcome::Hang);
    let (orchestrator, _events, _) = orchestrator(&ledger);
    let first = orchestrator.buy(&pool, PoolStatus::Open, 1);
    tokio::pin!(first);

    // when
    let second = tokio::select! {
        biased;
        _ = &mut first => panic!("hanging write resolved"),
        result = orchestrator.buy(&pool, PoolStatus::Open, 1) => result,
    };

    // then
    assert!(matches!(second, Err(WriteError::Busy)));
    assert_eq!(1, ledger.write_log().len());
    assert!(orchestrator.any_pending());
}

#[test]
fn begin__admits_one_write_then_refuses_until_it_settles() {
    // given
    let ledger = FakeLedger::new(viewer());
    let (orchestrator, _events, _) = orchestrator(&ledger);

    // when
    let first = orchestrator.begin(WriteKind::Buy, Some(0));
    let second = orchestrator.begin(WriteKind::Claim, Some(0));

    // then
    assert!(first.is_ok());
    assert!(matches!(second, Err(WriteError::Busy)));
    assert_eq!(WriteState::Pending, orchestrator.write_state(WriteKind::Buy));
    assert_eq!(WriteState::Idle, orchestrator.write_state(WriteKind::Claim));
    assert!(matches!(
        orchestrator.begin_bulk(BulkRefund::new(0, RefundVariant::Standard, &[0])),
        Err(WriteError::Busy)
    ));
    assert_eq!(None, orchestrator.bulk_progress());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn buy__racing_from_several_threads__admits_exactly_one() {
    // given
    const ATTEMPTS: usize = 8;
    let ledger = FakeLedger::new(viewer());
    let pool = open_pool(&ledger);
    for _ in 0..ATTEMPTS {
        ledger.script_write(WriteOutcome::Hang);
    }
    let (orchestrator, _events, _) = orchestrator(&ledger);
    let orchestrator = Arc::new(orchestrator);
    let start = Arc::new(tokio::sync::Barrier::new(ATTEMPTS));

    // when
    let attempts: Vec<_> = (0..ATTEMPTS)
        .map(|_| {
            let orchestrator = orchestrator.clone();
            let pool = pool.clone();
            let start = start.clone();
            tokio::spawn(async move {
                start.wait().await;
                tokio::time::timeout(
                    Duration::from_millis(200),
                    orchestrator.buy(&pool, PoolStatus::Open, 1),
                )
                .await
            })
        })
        .collect();
    let mut admitted = 0;
    let mut busy = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Err(_still_pending) => admitted += 1,
            Ok(Err(WriteError::Busy)) => busy += 1,
            Ok(other) => panic!("unexpected outcome {other:?}"),
        }
    }

    // then
    assert_eq!(1, admitted);
    assert_eq!(ATTEMPTS - 1, busy);
    assert_eq!(1, ledger.write_log().len());
}

#[tokio::test]
async fn buy__when_not_open__is_not_eligible() {
    // given
    let ledger = FakeLedger::new(viewer());
    let pool = open_pool(&ledger);
    let (orchestrator, _events, _) = orchestrator(&ledger);

    // when
    let result = orchestrator.buy(&pool, PoolStatus::Expired, 1).await;

    // then
    assert!(matches!(result, Err(WriteError::NotEligible { .. })));
    assert!(ledger.write_log().is_empty());
}

#[tokio::test]
async fn write__rejected__reports_first_line_and_fails() {
    // given
    let ledger = FakeLedger::new(viewer());
    let pool = open_pool(&ledger);
    ledger.script_write(WriteOutcome::Reject(
        "insufficient funds for gas\n    at eth_sendRawTransaction".to_string(),
    ));
    let (orchestrator, mut events, _) = orchestrator(&ledger);

    // when
    let err = orchestrator
        .buy(&pool, PoolStatus::Open, 1)
        .await
        .unwrap_err();

    // then
    assert_eq!("insufficient funds for gas", err.user_message());
    assert_eq!(WriteState::Failed, orchestrator.write_state(WriteKind::Buy));
    assert!(!orchestrator.any_pending());
    assert!(
        !drain(&mut events)
            .iter()
            .any(|event| matches!(event, OrchestratorEvent::RefreshRequested { .. }))
    );
}

#[tokio::test]
async fn write__reverted__fails_with_tx_hash() {
    // given
    let ledger = FakeLedger::new(viewer());
    let pool = open_pool(&ledger);
    ledger.script_write(WriteOutcome::Revert);
    let (orchestrator, _events, _) = orchestrator(&ledger);

    // when
    let result = orchestrator.buy(&pool, PoolStatus::Open, 1).await;

    // then
    assert!(matches!(result, Err(WriteError::Reverted(_))));
    assert_eq!(WriteState::Failed, orchestrator.write_state(WriteKind::Buy));
}

#[tokio::test(start_paused = true)]
async fn write__unconfirmed_past_deadline__is_stuck_and_releases_gate() {
    // given
    let ledger = FakeLedger::new(viewer());
    let pool = open_pool(&ledger);
    ledger.script_write(WriteOutcome::Hang);
    let (orchestrator, _events, _) = orchestrator(&ledger);
    let orchestrator = orchestrator.with_confirmation_timeout(Some(Duration::from_secs(120)));

    // when
    let stuck = orchestrator.buy(&pool, PoolStatus::Open, 1).await;

    // then
    assert!(matches!(
        stuck,
        Err(WriteError::Stuck { waited, .. }) if waited == Duration::from_secs(120)
    ));
    assert_eq!(WriteState::Stuck, orchestrator.write_state(WriteKind::Buy));
    assert!(!orchestrator.any_pending());
    orchestrator.buy(&pool, PoolStatus::Open, 1).await.unwrap();
    assert_eq!(2, ledger.write_log().len());
}

#[tokio::test]
async fn create_pool__with_creation_event__stores_secret_under_new_id() {
    // given
    let ledger = FakeLedger::new(creator());
    for _ in 0..7 {
        ledger.add_pool(FakePool::new(creator(), U256::exp10(18), 0.into()));
    }
    let (orchestrator, _events, _) = orchestrator(&ledger);

    // when
    let outcome = orchestrator.create_pool("1").await.unwrap();

    // then
    assert!(matches!(outcome, CreationOutcome::Stored { pool_id: 7, .. }));
    let secret = orchestrator.vault().retrieve(7).unwrap().unwrap();
    assert_eq!(ledger.pool(7).details.commit_hash, commitment_of(&secret));
    assert_eq!(U256::exp10(18), ledger.pool(7).details.total_deposit);
    assert!(orchestrator.vault().retrieve(8).unwrap().is_none());
}

#[tokio::test]
async fn create_pool__without_creation_event__hands_back_secret_unstored() {
    // given
    let ledger = FakeLedger::new(creator());
    ledger.omit_creation_event();
    let (orchestrator, _events, store) = orchestrator(&ledger);

    // when
    let outcome = orchestrator.create_pool("0.5").await.unwrap();

    // then
    let CreationOutcome::PoolIdUnknown { secret, .. } = outcome else {
        panic!("expected unknown pool id, got {outcome:?}");
    };
    assert_eq!(ledger.pool(0).details.commit_hash, commitment_of(&secret));
    assert!(store.entries().lock().unwrap().is_empty());
    assert_eq!(WriteState::Confirmed, orchestrator.write_state(WriteKind::Create));
}

#[tokio::test]
async fn create_pool__invalid_deposit__submits_nothing() {
    // given
    let ledger = FakeLedger::new(creator());
    let (orchestrator, _events, _) = orchestrator(&ledger);

    // when
    let result = orchestrator.create_pool("0.001").await;

    // then
    assert!(matches!(
        result,
        Err(WriteError::InvalidDeposit(DepositError::BelowMinimum))
    ));
    assert!(ledger.write_log().is_empty());
}

#[tokio::test]
async fn reveal__with_stored_secret__discloses_it() {
    // given
    let ledger = FakeLedger::new(creator());
    let secret = Secret::generate();
    let pool_id = ledger.add_pool(
        FakePool::new(creator(), U256::exp10(18), 0.into())
            .with_commit(commitment_of(&secret))
            .with_tickets(viewer(), 100)
            .with_reveal_block(5),
    );
    let (orchestrator, _events, _) = orchestrator(&ledger);
    orchestrator.vault().store(pool_id, &secret).unwrap();

    // when
    orchestrator
        .reveal(&pool(&ledger, pool_id), PoolStatus::ReadyToReveal)
        .await
        .unwrap();

    // then
    assert_eq!(
        vec![WriteCall::RevealWinners {
            pool_id,
            secret: secret.as_h256()
        }],
        ledger.write_log()
    );
    assert!(ledger.pool(pool_id).details.is_revealed);
}

#[tokio::test]
async fn reveal__without_stored_secret__fails_locally() {
    // given
    let ledger = FakeLedger::new(creator());
    let pool_id = ledger.add_pool(
        FakePool::new(creator(), U256::exp10(18), 0.into()).with_tickets(viewer(), 100),
    );
    let (orchestrator, _events, _) = orchestrator(&ledger);

    // when
    let result = orchestrator
        .reveal(&pool(&ledger, pool_id), PoolStatus::ReadyToReveal)
        .await;

    // then
    assert!(matches!(result, Err(WriteError::SecretMissing(id)) if id == pool_id));
    assert!(ledger.write_log().is_empty());
    assert_eq!(WriteState::Idle, orchestrator.write_state(WriteKind::Reveal));
}

#[tokio::test]
async fn reveal__with_mismatching_secret__fails_locally() {
    // given
    let ledger = FakeLedger::new(creator());
    let pool_id = ledger.add_pool(
        FakePool::new(creator(), U256::exp10(18), 0.into())
            .with_commit(H256::repeat_byte(9))
            .with_tickets(viewer(), 100),
    );
    let (orchestrator, _events, _) = orchestrator(&ledger);
    orchestrator.vault().store(pool_id, &Secret::generate()).unwrap();

    // when
    let result = orchestrator
        .reveal(&pool(&ledger, pool_id), PoolStatus::ReadyToReveal)
        .await;

    // then
    assert!(matches!(result, Err(WriteError::SecretMismatch(_))));
    assert!(ledger.write_log().is_empty());
}

#[tokio::test]
async fn claim_all__marks_tickets_claimed() {
    // given
    let ledger = FakeLedger::new(viewer());
    let pool_id = ledger.add_pool(
        FakePool::new(creator(), U256::exp10(18), 0.into())
            .with_tickets(viewer(), 100)
            .revealed(&[(0, 5), (1, 1)]),
    );
    let (orchestrator, _events, _) = orchestrator(&ledger);

    // when
    orchestrator
        .claim_all(&pool(&ledger, pool_id), PoolStatus::Revealed, &[0, 1])
        .await
        .unwrap();

    // then
    let claimed = ledger.pool(pool_id).claimed;
    assert!(claimed[0] && claimed[1] && !claimed[2]);
}

#[tokio::test]
async fn refund_creator__picks_variant_from_status() {
    // given
    let ledger = FakeLedger::new(creator());
    let pool_id = ledger.add_pool(
        FakePool::new(creator(), U256::exp10(18), 0.into()).with_tickets(viewer(), 100),
    );
    let (orchestrator, _events, _) = orchestrator(&ledger);

    // when
    orchestrator
        .refund_creator(&pool(&ledger, pool_id), PoolStatus::RevealExpired)
        .await
        .unwrap();

    // then
    assert_eq!(
        vec![WriteCall::ExpiredPoolCreatorRefund { pool_id }],
        ledger.write_log()
    );
    assert!(ledger.pool(pool_id).creator_refunded);
}

#[tokio::test]
async fn refund_tickets__all_confirm__refunds_in_order() {
    // given
    let ledger = FakeLedger::new(viewer());
    let pool_id = ledger.add_pool(
        FakePool::new(creator(), U256::exp10(18), 0.into()).with_tickets(viewer(), 3),
    );
    let (orchestrator, _events, _) = orchestrator(&ledger);

    // when
    let summary = orchestrator
        .refund_tickets(&pool(&ledger, pool_id), PoolStatus::Expired, &[0, 1, 2])
        .await
        .unwrap();

    // then
    assert_eq!(vec![0, 1, 2], summary.refunded);
    assert_eq!(
        vec![
            WriteCall::RefundTicket {
                pool_id,
                ticket_id: 0
            },
            WriteCall::RefundTicket {
                pool_id,
                ticket_id: 1
            },
            WriteCall::RefundTicket {
                pool_id,
                ticket_id: 2
            },
        ],
        ledger.write_log()
    );
    assert_eq!(None, orchestrator.bulk_progress());
}

#[tokio::test]
async fn refund_tickets__second_reverts__stops_and_keeps_first() {
    // given
    let ledger = FakeLedger::new(viewer());
    let pool_id = ledger.add_pool(
        FakePool::new(creator(), U256::exp10(18), 0.into()).with_tickets(viewer(), 3),
    );
    ledger.script_write(WriteOutcome::Confirm);
    ledger.script_write(WriteOutcome::Revert);
    let (orchestrator, mut events, _) = orchestrator(&ledger);

    // when
    let result = orchestrator
        .refund_tickets(&pool(&ledger, pool_id), PoolStatus::Expired, &[0, 1, 2])
        .await;

    // then
    assert!(matches!(
        result,
        Err(WriteError::SequenceAborted {
            completed: 1,
            total: 3,
            ..
        })
    ));
    assert_eq!(2, ledger.write_log().len());
    let progress: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            OrchestratorEvent::Progress(progress) => Some((progress.completed, progress.total)),
            _ => None,
        })
        .collect();
    assert_eq!(vec![(0, 3), (1, 3)], progress);
    assert_eq!(Address::zero(), ledger.ticket_owner(pool_id, 0));
    assert_eq!(viewer(), ledger.ticket_owner(pool_id, 1));
    assert_eq!(viewer(), ledger.ticket_owner(pool_id, 2));
    assert!(!orchestrator.any_pending());
    assert_eq!(None, orchestrator.bulk_progress());
}

#[tokio::test]
async fn refund_tickets__reveal_expired__uses_expired_pool_refund() {
    // given
    let ledger = FakeLedger::new(viewer());
    let pool_id = ledger.add_pool(
        FakePool::new(creator(), U256::exp10(18), 0.into()).with_tickets(viewer(), 100),
    );
    let (orchestrator, _events, _) = orchestrator(&ledger);

    // when
    orchestrator
        .refund_tickets(&pool(&ledger, pool_id), PoolStatus::RevealExpired, &[4])
        .await
        .unwrap();

    // then
    assert_eq!(
        vec![WriteCall::ExpiredPoolRefund {
            pool_id,
            ticket_id: 4
        }],
        ledger.write_log()
    );
}

#[tokio::test]
async fn refund_tickets__in_progress__blocks_other_writes() {
    // given
    let ledger = FakeLedger::new(viewer());
    let pool_id = ledger.add_pool(
        FakePool::new(creator(), U256::exp10(18), 0.into()).with_tickets(viewer(), 2),
    );
    let open = open_pool(&ledger);
    ledger.script_write(WriteOutcome::Hang);
    let (orchestrator, _events, _) = orchestrator(&ledger);
    let expired = pool(&ledger, pool_id);
    let refunds = orchestrator.refund_tickets(&expired, PoolStatus::Expired, &[0, 1]);
    tokio::pin!(refunds);

    // when
    let buy = tokio::select! {
        biased;
        _ = &mut refunds => panic!("hanging refund resolved"),
        result = orchestrator.buy(&open, PoolStatus::Open, 1) => result,
    };

    // then
    assert!(matches!(buy, Err(WriteError::Busy)));
    assert_eq!(
        Some(BulkProgress {
            pool_id,
            completed: 0,
            total: 2
        }),
        orchestrator.bulk_progress()
    );
}
