#![allow(non_snake_case)]

use prize_pool_client::{
    actions::{
        Action,
        ViewerHoldings,
        available_actions,
    },
    orchestrator::CreationOutcome,
    pool::{
        POOL_LIFETIME_SECS,
        REVEAL_WINDOW_BLOCKS,
        TICKETS_PER_POOL,
    },
    status::PoolStatus,
    test_helpers::{
        FAKE_REVEAL_DELAY,
        FakePool,
        TestContext,
    },
    tickets::load_ticket_slots,
};
use web3::types::{
    Address,
    U256,
};

#[tokio::test]
async fn status__sold_out_pool__walks_through_reveal_window() {
    let ctx = TestContext::new();
    // given
    let pool_id = ctx.chain().add_pool(
        FakePool::new(TestContext::creator(), U256::exp10(18), 0.into())
            .with_tickets(TestContext::alice(), TICKETS_PER_POOL)
            .with_reveal_block(1_000),
    );

    // when
    ctx.chain().set_block(999);
    let waiting = ctx.status(pool_id).await;
    ctx.chain().set_block(1_000);
    let ready = ctx.status(pool_id).await;
    ctx.chain().set_block(1_000 + REVEAL_WINDOW_BLOCKS);
    let last_chance = ctx.status(pool_id).await;
    ctx.chain().set_block(1_001 + REVEAL_WINDOW_BLOCKS);
    let expired = ctx.status(pool_id).await;

    // then
    assert_eq!(PoolStatus::SoldOutWaiting, waiting);
    assert_eq!(PoolStatus::ReadyToReveal, ready);
    assert_eq!(PoolStatus::ReadyToReveal, last_chance);
    assert_eq!(PoolStatus::RevealExpired, expired);
}

#[tokio::test]
async fn status__unsold_pool__expires_after_seven_days() {
    let ctx = TestContext::new();
    // given
    let created_at = 1_700_000_000u64;
    let pool_id = ctx.chain().add_pool(
        FakePool::new(TestContext::creator(), U256::exp10(18), created_at.into())
            .with_tickets(TestContext::alice(), 40),
    );

    // when
    ctx.chain().set_timestamp(created_at + POOL_LIFETIME_SECS - 1);
    let before = ctx.status(pool_id).await;
    ctx.chain().set_timestamp(created_at + POOL_LIFETIME_SECS + 1);
    let after = ctx.status(pool_id).await;

    // then
    assert_eq!(PoolStatus::Open, before);
    assert_eq!(PoolStatus::Expired, after);
}

#[tokio::test]
async fn full_round__create_sell_out_reveal_claim_withdraw() {
    let ctx = TestContext::new();
    let (creator, _creator_events) = ctx.orchestrator_for(TestContext::creator());

    // create
    let outcome = creator.create_pool("1").await.unwrap();
    let CreationOutcome::Stored { pool_id, .. } = outcome else {
        panic!("expected stored secret, got {outcome:?}");
    };
    assert_eq!(PoolStatus::Open, ctx.status(pool_id).await);

    // ten buyers take ten tickets each
    let (alice, _alice_events) = ctx.orchestrator_for(TestContext::alice());
    alice
        .buy(&ctx.pool(pool_id), PoolStatus::Open, 10)
        .await
        .unwrap();
    for buyer in 1..10u64 {
        let (orchestrator, _events) = ctx.orchestrator_for(Address::from_low_u64_be(buyer));
        orchestrator
            .buy(&ctx.pool(pool_id), PoolStatus::Open, 10)
            .await
            .unwrap();
    }
    assert_eq!(PoolStatus::SoldOutWaiting, ctx.status(pool_id).await);

    // reveal once the window opens
    ctx.chain().set_block(1 + FAKE_REVEAL_DELAY);
    assert_eq!(PoolStatus::ReadyToReveal, ctx.status(pool_id).await);
    creator
        .reveal(&ctx.pool(pool_id), PoolStatus::ReadyToReveal)
        .await
        .unwrap();
    assert_eq!(PoolStatus::Revealed, ctx.status(pool_id).await);

    // alice sees her tickets as claimable and claims them
    let pool = ctx.pool(pool_id);
    let slots = load_ticket_slots(&ctx.ledger_for(TestContext::alice()), &pool)
        .await
        .unwrap();
    let holdings = ViewerHoldings {
        tickets_bought: 10,
        owned: slots.owned_by(&TestContext::alice()),
        claimable: slots.claimable_by(&TestContext::alice()),
    };
    assert_eq!((0..10).collect::<Vec<u8>>(), holdings.owned);
    let actions = available_actions(
        &pool,
        PoolStatus::Revealed,
        Some(TestContext::alice()),
        &holdings,
    );
    let Some(Action::ClaimAll { tickets }) = actions.first() else {
        panic!("expected claim, got {actions:?}");
    };
    alice
        .claim_all(&pool, PoolStatus::Revealed, tickets)
        .await
        .unwrap();
    assert!(ctx.chain().pool(pool_id).claimed[..10].iter().all(|c| *c));

    // creator takes the fee
    let actions = available_actions(
        &pool,
        PoolStatus::Revealed,
        Some(TestContext::creator()),
        &ViewerHoldings::default(),
    );
    assert_eq!(vec![Action::CreatorWithdraw], actions);
    creator
        .creator_withdraw(&pool, PoolStatus::Revealed)
        .await
        .unwrap();
    assert!(ctx.chain().pool(pool_id).details.creator_fee_withdrawn);
}

#[tokio::test]
async fn reveal__by_someone_without_the_secret__fails_before_submitting() {
    let ctx = TestContext::new();
    // given
    let (creator, _events) = ctx.orchestrator_for(TestContext::creator());
    let CreationOutcome::Stored { pool_id, .. } = creator.create_pool("1").await.unwrap() else {
        panic!("creation event missing");
    };
    let writes_before = ctx.chain().write_log().len();
    let (bob, _bob_events) = ctx.orchestrator_for(TestContext::bob());

    // when
    let result = bob
        .reveal(&ctx.pool(pool_id), PoolStatus::ReadyToReveal)
        .await;

    // then
    assert!(result.is_err());
    assert_eq!(writes_before, ctx.chain().write_log().len());
}
