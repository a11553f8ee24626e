use std::time::Duration;

use ledger_keeper::{
    events::Event,
    ledger_master::CheckAccept,
    pluggables::AcquireReason,
    service::Configuration,
    types::data_types::LedgerSeq,
};

mod common;

use common::{
    chain::build_chain,
    harness::{drain, no_history, validate_and_accept, Harness},
};

/// Tests that every ledger between the published and the valid ledger is published in sequence order.
#[test]
fn publishes_contiguous_run_test() {
    let harness = Harness::new();
    let chain = build_chain(8);
    harness.cache_ledgers(&chain);
    let (ledger_master, events) = harness.start(no_history());

    assert_eq!(validate_and_accept(&harness, &ledger_master, &chain[4]), CheckAccept::Advanced);
    drain(&events);

    assert_eq!(validate_and_accept(&harness, &ledger_master, &chain[8]), CheckAccept::Advanced);

    assert_eq!(harness.ops.published(), vec![4, 5, 6, 7, 8]);
    let published: Vec<u32> = drain(&events)
        .iter()
        .filter_map(|e| match e {
            Event::PublishLedger(p) => Some(p.seq.int()),
            _ => None,
        })
        .collect();
    assert_eq!(published, vec![5, 6, 7, 8]);
    assert_eq!(ledger_master.complete_ledgers(), "4-8");
    assert!(ledger_master.find_new_ledgers_to_publish().unwrap().is_empty());
    assert!(harness.inbound.acquisitions().is_empty());
}

/// Tests that when the valid ledger gets too far ahead, publishing skips straight to it.
#[test]
fn skips_large_gap_test() {
    let harness = Harness::new();
    let chain = build_chain(160);
    harness.cache_ledgers(&chain[..=10]);
    harness.cache_ledgers(&chain[160..]);
    let (ledger_master, events) = harness.start(no_history());

    validate_and_accept(&harness, &ledger_master, &chain[10]);
    assert_eq!(validate_and_accept(&harness, &ledger_master, &chain[160]), CheckAccept::Advanced);

    assert_eq!(harness.ops.published(), vec![10, 160]);
    assert_eq!(ledger_master.published_ledger_index(), LedgerSeq::new(160));
    assert!(harness.inbound.acquisitions().is_empty());

    let skips: Vec<(u32, u32)> = drain(&events)
        .iter()
        .filter_map(|e| match e {
            Event::SkipGap(s) => Some((s.published_seq.int(), s.valid_seq.int())),
            _ => None,
        })
        .collect();
    assert_eq!(skips, vec![(10, 160)]);
}

/// Tests that a gap within `max_ledger_gap` is not skipped.
#[test]
fn gap_within_limit_is_filled_test() {
    let harness = Harness::new();
    let chain = build_chain(30);
    harness.cache_ledgers(&chain);
    let configuration = Configuration::builder()
        .ledger_history(0)
        .max_ledger_gap(20)
        .build();
    let (ledger_master, _events) = harness.start(configuration);

    validate_and_accept(&harness, &ledger_master, &chain[10]);
    validate_and_accept(&harness, &ledger_master, &chain[30]);

    assert_eq!(harness.ops.published(), (10..=30).collect::<Vec<u32>>());
}

/// Tests that ledgers missing from the run are acquired, at most `ledger_fetch_size` per pass, and that
/// publishing continues once they arrive.
#[test]
fn acquires_missing_ledgers_test() {
    let harness = Harness::new();
    let chain = build_chain(12);
    harness.cache_ledgers(&chain[..=5]);
    harness.cache_ledgers(&chain[12..]);
    let (ledger_master, _events) = harness.start(no_history());

    validate_and_accept(&harness, &ledger_master, &chain[5]);
    assert_eq!(validate_and_accept(&harness, &ledger_master, &chain[12]), CheckAccept::Advanced);

    assert_eq!(harness.inbound.acquired_seqs(), vec![6, 7, 8, 9]);
    assert!(harness
        .inbound
        .acquisitions()
        .iter()
        .all(|(_, reason)| *reason == AcquireReason::Generic));
    assert_eq!(harness.ops.published(), vec![5]);
    assert_eq!(ledger_master.valid_ledger_index(), LedgerSeq::new(12));

    harness.cache_ledgers(&chain[6..=11]);
    ledger_master.try_advance();

    assert_eq!(harness.ops.published(), (5..=12).collect::<Vec<u32>>());
    assert_eq!(ledger_master.complete_ledgers(), "5-12");
}

/// Tests that a ledger that fails to save is un-marked and reacquired.
#[test]
fn failed_save_reacquires_test() {
    let harness = Harness::new();
    let chain = build_chain(10);
    harness.cache_ledgers(&chain);
    let (ledger_master, _events) = harness.start(no_history());
    harness.store.fail_saves(true);

    ledger_master.set_full_ledger(&chain[10], true, true);

    assert!(!ledger_master.have_ledger(LedgerSeq::new(10)));
    assert!(ledger_master.validated_ledger().is_none());
    assert_eq!(
        harness.inbound.acquisitions(),
        vec![(LedgerSeq::new(10), AcquireReason::Generic)]
    );
}

/// Tests that once publishing has caught up, the newest missing history ledger is acquired and
/// backfilling from it marks the rest of the indexed history present.
#[test]
fn acquires_history_and_backfills_test() {
    let harness = Harness::new();
    let chain = build_chain(10);
    for ledger in &chain[..=8] {
        harness.store.index(ledger);
    }
    harness.inbound.make_available(&chain[9]);
    harness.cache_ledgers(&chain[10..]);
    let (ledger_master, events) = harness.start(Configuration::default());

    assert_eq!(validate_and_accept(&harness, &ledger_master, &chain[10]), CheckAccept::Advanced);

    assert_eq!(
        harness.inbound.acquisitions(),
        vec![(LedgerSeq::new(9), AcquireReason::History)]
    );
    assert_eq!(harness.scheduler.count("tryFill"), 1);
    assert_eq!(ledger_master.complete_ledgers(), "0-10");
    assert_eq!(ledger_master.published_ledger_index(), LedgerSeq::new(10));

    let backfills: Vec<(u32, u32)> = drain(&events)
        .iter()
        .filter_map(|e| match e {
            Event::Backfill(b) => Some((b.min_seq.int(), b.max_seq.int())),
            _ => None,
        })
        .collect();
    assert_eq!(backfills, vec![(0, 9)]);
}

/// Tests that history is not acquired while the valid ledger is too old.
#[test]
fn no_history_while_behind_test() {
    let harness = Harness::new();
    let chain = build_chain(10);
    harness.inbound.make_available(&chain[9]);
    harness.cache_ledgers(&chain[10..]);
    let configuration = Configuration::builder()
        .max_ledger_age_acquire(Duration::from_secs(1))
        .build();
    let (ledger_master, _events) = harness.start(configuration);

    validate_and_accept(&harness, &ledger_master, &chain[10]);

    assert!(harness.inbound.acquisitions().is_empty());
    assert_eq!(ledger_master.complete_ledgers(), "10");
}
