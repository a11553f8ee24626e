use std::sync::Arc;

use ledger_keeper::{
    events::Event,
    pluggables::LedgerCache,
    types::{crypto_primitives::sha256, data_types::LedgerSeq, ledger::Ledger},
};

mod common;

use common::{
    chain::{build_chain, fork_from},
    harness::{drain, no_history, Harness},
};

fn cache_validated(harness: &Harness, ledgers: &[Arc<Ledger>]) {
    for ledger in ledgers {
        harness.cache.insert(ledger.clone(), true);
    }
}

/// Tests that the ledgers of an abandoned fork are un-marked, down to the seam where the fork left the
/// chain of the new ledger.
#[test]
fn fork_is_invalidated_down_to_seam_test() {
    let harness = Harness::new();
    let chain = build_chain(501);
    let fork = fork_from(&chain[495], 5);
    cache_validated(&harness, &chain[490..=495]);
    cache_validated(&harness, &fork);
    let (ledger_master, events) = harness.start(no_history());
    ledger_master.set_ledger_range_present(LedgerSeq::new(0), LedgerSeq::new(500));

    assert_eq!(ledger_master.fix_mismatch(&chain[501]), 5);
    assert_eq!(ledger_master.complete_ledgers(), "0-495");

    let invalidations: Vec<(u32, u32, Option<u32>)> = drain(&events)
        .iter()
        .filter_map(|e| match e {
            Event::InvalidateLedgers(i) => {
                Some((i.from_seq.int(), i.invalidated, i.seam.map(|seam| seam.int())))
            }
            _ => None,
        })
        .collect();
    assert_eq!(invalidations, vec![(501, 5, Some(495))]);
}

/// Tests that the scan skips sequences that are not held, and stops at the first held ledger on the new
/// ledger's chain.
#[test]
fn scan_skips_missing_ledgers_test() {
    let harness = Harness::new();
    let chain = build_chain(501);
    let fork = fork_from(&chain[495], 5);
    cache_validated(&harness, &chain[490..=493]);
    cache_validated(&harness, &fork);
    let (ledger_master, _events) = harness.start(no_history());
    ledger_master.set_ledger_range_present(LedgerSeq::new(490), LedgerSeq::new(493));
    ledger_master.set_ledger_range_present(LedgerSeq::new(496), LedgerSeq::new(500));

    assert_eq!(ledger_master.fix_mismatch(&chain[501]), 5);
    assert_eq!(ledger_master.complete_ledgers(), "490-493");
}

/// Tests that a held ledger failing its integrity check is un-marked and ends the scan.
#[test]
fn corrupt_ledger_ends_scan_test() {
    let harness = Harness::new();
    let chain = build_chain(501);
    let fork = fork_from(&chain[495], 5);
    let corrupt = Arc::new(Ledger::from_stored(
        fork[2].header().clone(),
        sha256(b"not the hash of this header"),
        fork[2].skip_list().to_vec(),
    ));
    cache_validated(&harness, &chain[490..=495]);
    cache_validated(&harness, &fork[3..]);
    cache_validated(&harness, &[corrupt]);
    let (ledger_master, events) = harness.start(no_history());
    ledger_master.set_ledger_range_present(LedgerSeq::new(0), LedgerSeq::new(500));

    assert_eq!(ledger_master.fix_mismatch(&chain[501]), 3);
    assert_eq!(ledger_master.complete_ledgers(), "0-497");
    assert!(drain(&events)
        .iter()
        .any(|e| matches!(e, Event::InvalidateLedgers(i) if i.seam.is_none())));
}

#[test]
fn no_mismatch_test() {
    let harness = Harness::new();
    let chain = build_chain(10);
    cache_validated(&harness, &chain);
    let (ledger_master, _events) = harness.start(no_history());
    ledger_master.set_ledger_range_present(LedgerSeq::new(0), LedgerSeq::new(9));

    assert_eq!(ledger_master.fix_mismatch(&chain[10]), 0);
    assert_eq!(ledger_master.complete_ledgers(), "0-9");
}

/// Tests that accepting a ledger whose parent is not the ledger held at the previous sequence repairs
/// the present set.
#[test]
fn accepting_ledger_repairs_previous_test() {
    let harness = Harness::new();
    let chain = build_chain(501);
    let fork = fork_from(&chain[495], 5);
    cache_validated(&harness, &chain[490..=495]);
    cache_validated(&harness, &fork);
    let (ledger_master, events) = harness.start(no_history());
    ledger_master.set_ledger_range_present(LedgerSeq::new(490), LedgerSeq::new(500));

    ledger_master.set_full_ledger(&chain[501], true, true);

    assert_eq!(ledger_master.complete_ledgers(), "490-495,501");
    assert!(drain(&events)
        .iter()
        .any(|e| matches!(e, Event::InvalidateLedgers(i) if i.invalidated == 5)));
}

/// Tests that a stored index entry disagreeing with the accepted ledger's parent un-marks the previous
/// sequence.
#[test]
fn bad_index_entry_is_cleared_test() {
    let harness = Harness::new();
    let chain = build_chain(501);
    let fork = fork_from(&chain[495], 5);
    harness.store.index(&fork[4]);
    let (ledger_master, _events) = harness.start(no_history());
    ledger_master.set_ledger_range_present(LedgerSeq::new(499), LedgerSeq::new(500));

    ledger_master.set_full_ledger(&chain[501], true, true);

    assert_eq!(ledger_master.complete_ledgers(), "499,501");
}
