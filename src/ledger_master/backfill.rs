/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Backfilling: marking a run of older ledgers present by walking the ledger store's sequence index
//! backwards from a ledger that is already present.
//!
//! The walk starts at a ledger whose parent is indexed in the store, and steps back one sequence at a
//! time, checking that each indexed ledger's hash is the parent hash recorded by the ledger after it.
//! It reads the index in windows of `hash_batch_size` sequences. It stops when it reaches:
//! 1. A sequence already marked present (the seam with existing history),
//! 2. A sequence missing from the index,
//! 3. A ledger whose hash does not match the parent hash expected of it,
//! 4. The genesis ledger, or
//! 5. Cancellation of its job.
//!
//! Progress is written to the range tracker every time the window is refilled and when the walk ends,
//! so a cancelled walk keeps what it has verified.

use std::{collections::BTreeMap, sync::Arc, time::SystemTime};

use crate::{
    events::{BackfillEvent, Event},
    job_queue::{Job, JobType},
    networking::network::Network,
    types::{
        data_types::{CryptoHash, LedgerSeq},
        ledger::Ledger,
    },
};

use super::LedgerMaster;

/// Why a backfill walk stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FillStop {
    /// Reached a sequence that was already present.
    Seam,
    /// Reached a sequence the store has no index entry for.
    IndexGap,
    /// The indexed ledger at a sequence is not the parent of the ledger after it.
    ParentMismatch,
    Cancelled,
    Genesis,
}

/// The result of a backfill walk: `[min_seq, max_seq]` was marked present.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FillOutcome {
    pub min_seq: LedgerSeq,
    pub max_seq: LedgerSeq,
    pub stop: FillStop,
}

impl<N: Network> LedgerMaster<N> {
    /// Schedule a backfill walk from `ledger`. The caller must have set the fill marker.
    pub(crate) fn schedule_fill(self: &Arc<Self>, ledger: Arc<Ledger>) {
        let ledger_master = self.clone();
        let scheduled = self.context.scheduler.schedule(
            JobType::PubOldLedger,
            "tryFill",
            Box::new(move |job| {
                ledger_master.try_fill(job, &ledger);
            }),
        );
        if !scheduled {
            self.lock_state().fill_in_progress = None;
        }
    }

    /// Walk the store's sequence index back from `ledger`, marking every verified ledger present.
    pub fn try_fill(self: &Arc<Self>, job: &Job, ledger: &Arc<Ledger>) -> FillOutcome {
        let batch = self.config.hash_batch_size.max(1);
        let store = &self.context.ledger_store;

        let mut seq = ledger.seq();
        let mut prev_hash = ledger.parent_hash();
        let mut min_has = seq;
        let mut max_has = seq;
        let mut window: BTreeMap<LedgerSeq, (CryptoHash, CryptoHash)> = BTreeMap::new();

        let stop = loop {
            if job.should_cancel() {
                break FillStop::Cancelled;
            }

            min_has = seq;
            let Some(prev_seq) = seq.prev() else {
                break FillStop::Genesis;
            };
            seq = prev_seq;

            if self.lock_state().complete.contains(seq) {
                break FillStop::Seam;
            }

            if !window.contains_key(&seq) {
                // Commit what has been verified so far before reading the next window.
                self.lock_state().complete.set_range(min_has, max_has);
                max_has = min_has;

                window = store.hashes_by_seq_range(seq.saturating_sub(batch - 1), seq);
                if !window.contains_key(&seq) {
                    log::debug!("Backfill stopped at index gap {}", seq);
                    break FillStop::IndexGap;
                }
            }

            let Some(&(hash, parent_hash)) = window.get(&seq) else {
                break FillStop::IndexGap;
            };
            if hash != prev_hash {
                log::warn!("Backfill stopped at {}: hash does not match the parent hash above it", seq);
                break FillStop::ParentMismatch;
            }
            prev_hash = parent_hash;
        };

        {
            let mut state = self.lock_state();
            state.complete.set_range(min_has, max_has);
            state.fill_in_progress = None;
        }

        let outcome = FillOutcome {
            min_seq: min_has,
            max_seq: ledger.seq(),
            stop,
        };
        log::debug!(
            "Backfilled {} - {}, stopped: {:?}",
            outcome.min_seq,
            outcome.max_seq,
            outcome.stop
        );
        self.publish_event(Event::Backfill(BackfillEvent {
            timestamp: SystemTime::now(),
            min_seq: outcome.min_seq,
            max_seq: outcome.max_seq,
        }));

        self.try_advance();
        outcome
    }
}
