#![allow(non_snake_case)]

use super::*;
use crate::test_helpers::{
    FakeLedger,
    FakePool,
};
use proptest::prelude::*;
use web3::types::{
    Address,
    U256,
};

fn ledger_with_pools(count: usize) -> FakeLedger {
    let ledger = FakeLedger::read_only();
    for i in 0..count {
        ledger.add_pool(FakePool::new(
            Address::repeat_byte(1),
            U256::exp10(18),
            (1_000 + i as u64).into(),
        ));
    }
    ledger
}

fn ids(pools: &[Pool]) -> Vec<PoolId> {
    pools.iter().map(|pool| pool.id).collect()
}

#[tokio::test(start_paused = true)]
async fn load_all__twelve_pools__reads_in_three_batches() {
    // given
    let ledger = ledger_with_pools(12);
    let aggregator = PoolAggregator::new(Arc::new(ledger.clone()));

    // when
    let pools = aggregator.load_all().await.unwrap();

    // then
    assert_eq!((0..12).collect::<Vec<_>>(), ids(&pools));
    // details and created-at per id
    assert_eq!(vec![10, 10, 4], ledger.batch_sizes());
    assert_eq!(U256::from(1_011), pools[11].created_at);
}

#[tokio::test(start_paused = true)]
async fn load_all__second_batch_fails__returns_surviving_pools() {
    // given
    let ledger = ledger_with_pools(12);
    ledger.fail_batch(1);
    let aggregator = PoolAggregator::new(Arc::new(ledger.clone()));

    // when
    let pools = aggregator.load_all().await.unwrap();

    // then
    assert_eq!(vec![0, 1, 2, 3, 4, 10, 11], ids(&pools));
    assert_eq!(3, ledger.batch_sizes().len());
}

#[tokio::test(start_paused = true)]
async fn load_all__single_id_fails__skips_only_that_id() {
    // given
    let ledger = ledger_with_pools(6);
    ledger.fail_reads_for(3);
    let aggregator = PoolAggregator::new(Arc::new(ledger));

    // when
    let pools = aggregator.load_all().await.unwrap();

    // then
    assert_eq!(vec![0, 1, 2, 4, 5], ids(&pools));
}

#[tokio::test(start_paused = true)]
async fn load_all__oversold_snapshot__is_skipped() {
    // given
    let ledger = ledger_with_pools(2);
    let mut broken = FakePool::new(Address::repeat_byte(2), U256::exp10(18), 0.into());
    broken.details.tickets_sold = 101.into();
    ledger.add_pool(broken);
    let aggregator = PoolAggregator::new(Arc::new(ledger));

    // when
    let pools = aggregator.load_all().await.unwrap();

    // then
    assert_eq!(vec![0, 1], ids(&pools));
}

#[tokio::test(start_paused = true)]
async fn load_all__no_pools__issues_no_batch() {
    // given
    let ledger = FakeLedger::read_only();
    let aggregator = PoolAggregator::new(Arc::new(ledger.clone()));

    // when
    let pools = aggregator.load_all().await.unwrap();

    // then
    assert!(pools.is_empty());
    assert!(ledger.batch_log().is_empty());
}

#[tokio::test(start_paused = true)]
async fn load_all__pauses_between_batches_but_not_after_last() {
    // given
    let ledger = ledger_with_pools(12);
    let aggregator = PoolAggregator::new(Arc::new(ledger));
    let started = tokio::time::Instant::now();

    // when
    aggregator.load_all().await.unwrap();

    // then
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(500), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(750), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn refresh__publishes_new_list_and_clears_loading() {
    // given
    let ledger = ledger_with_pools(3);
    let aggregator = PoolAggregator::new(Arc::new(ledger));
    let receiver = aggregator.subscribe();

    // when
    let outcome = aggregator.refresh().await;

    // then
    assert_eq!(RefreshOutcome::Applied { pools: 3 }, outcome);
    let state = receiver.borrow().clone();
    assert!(!state.loading);
    assert_eq!(1, state.generation);
    assert_eq!(3, state.pools.len());
    assert_eq!(Some(2), state.get(2).map(|pool| pool.id));
}

#[tokio::test(start_paused = true)]
async fn refresh__count_fails__keeps_previous_list() {
    // given
    let ledger = ledger_with_pools(3);
    let aggregator = PoolAggregator::new(Arc::new(ledger.clone()));
    aggregator.refresh().await;
    let before = aggregator.snapshot();
    ledger.fail_pool_count(Some(LedgerError::Rpc("timeout".to_string())));

    // when
    let outcome = aggregator.refresh().await;

    // then
    assert_eq!(RefreshOutcome::CountFailed, outcome);
    let after = aggregator.snapshot();
    assert!(!after.loading);
    assert!(Arc::ptr_eq(&before.pools, &after.pools));
}

#[tokio::test(start_paused = true)]
async fn refresh__newer_refresh_started__older_results_discarded() {
    // given
    let ledger = ledger_with_pools(1);
    ledger.set_read_latency(Duration::from_secs(1));
    let aggregator = Arc::new(PoolAggregator::new(Arc::new(ledger.clone())));
    let first = tokio::spawn({
        let aggregator = aggregator.clone();
        async move { aggregator.refresh().await }
    });
    tokio::task::yield_now().await;
    assert!(aggregator.snapshot().loading);

    // when
    ledger.add_pool(FakePool::new(Address::repeat_byte(3), U256::exp10(18), 0.into()));
    let second = aggregator.refresh().await;
    let first = first.await.unwrap();

    // then
    assert_eq!(RefreshOutcome::Superseded, first);
    assert_eq!(RefreshOutcome::Applied { pools: 2 }, second);
    let state = aggregator.snapshot();
    assert_eq!(2, state.generation);
    assert_eq!(2, state.pools.len());
    assert!(!state.loading);
}

#[tokio::test]
async fn load_one__reads_details_and_creation_time_in_one_request() {
    // given
    let ledger = ledger_with_pools(4);
    let aggregator = PoolAggregator::new(Arc::new(ledger.clone()));

    // when
    let pool = aggregator.load_one(2).await.unwrap();

    // then
    assert_eq!(2, pool.id);
    assert_eq!(U256::from(1_002), pool.created_at);
    assert_eq!(
        vec![vec![ReadCall::PoolDetails(2), ReadCall::PoolCreatedAt(2)]],
        ledger.batch_log()
    );
}

#[tokio::test]
async fn load_one__unknown_pool__is_ledger_error() {
    // given
    let aggregator = PoolAggregator::new(Arc::new(ledger_with_pools(1)));

    // when
    let result = aggregator.load_one(9).await;

    // then
    assert!(matches!(result, Err(PoolLoadError::Ledger(_))));
}

proptest! {
    #[test]
    fn load_all__every_batch_succeeds__returns_all_ids_in_order(
        count in 0usize..40,
        batch_size in 1usize..8,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();
        let pools = runtime.block_on(async {
            let aggregator = PoolAggregator::with_batching(
                Arc::new(ledger_with_pools(count)),
                batch_size,
                DEFAULT_BATCH_DELAY,
            );
            aggregator.load_all().await.unwrap()
        });
        prop_assert_eq!((0..count as u64).collect::<Vec<_>>(), ids(&pools));
    }
}
