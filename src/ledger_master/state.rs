/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The mutable state of the [`LedgerMaster`](super::LedgerMaster), kept behind a single mutex.
//!
//! Every field here is read and written only inside short critical sections. No code holds the mutex
//! while it acquires a ledger, persists a ledger, sends a message, or schedules a job.

use std::sync::Arc;

use crate::{
    range_tracker::RangeTracker,
    types::{
        data_types::{CryptoHash, LedgerSeq, NetTime},
        ledger::Ledger,
    },
};

/// A ledger pointer and the time associated with it.
///
/// For the valid ledger `time` is the ledger's sign time; for the published ledger it is the ledger's
/// close time.
#[derive(Clone, Debug, Default)]
pub(crate) struct LedgerPointer {
    pub(crate) ledger: Option<Arc<Ledger>>,
    pub(crate) time: NetTime,
}

impl LedgerPointer {
    /// Sequence of the pointed-to ledger, or 0 if there is none.
    pub(crate) fn seq(&self) -> LedgerSeq {
        self.ledger
            .as_ref()
            .map(|ledger| ledger.seq())
            .unwrap_or_default()
    }

    /// Whether a ledger at `seq` would not move this pointer forward.
    pub(crate) fn is_stale(&self, seq: LedgerSeq) -> bool {
        self.ledger.as_ref().is_some_and(|ledger| seq <= ledger.seq())
    }

    pub(crate) fn set(&mut self, ledger: Arc<Ledger>, time: NetTime) {
        self.ledger = Some(ledger);
        self.time = time;
    }
}

#[derive(Default)]
pub(crate) struct MasterState {
    /// The highest ledger known to have a quorum of trusted validations.
    pub(crate) valid: LedgerPointer,
    /// The highest ledger delivered to subscribers. Never ahead of `valid`.
    pub(crate) published: LedgerPointer,
    /// The last ledger closed by local consensus.
    pub(crate) closed: Option<Arc<Ledger>>,
    /// The highest quorum-backed `(hash, seq)` seen by `check_accept`, whether or not the ledger is
    /// available yet.
    pub(crate) last_validation: Option<(CryptoHash, LedgerSeq)>,
    pub(crate) complete: RangeTracker,
    pub(crate) building_seq: Option<LedgerSeq>,
    /// Start of the backfill walk in progress, if any.
    pub(crate) fill_in_progress: Option<LedgerSeq>,
    pub(crate) advance_running: bool,
    pub(crate) advance_work: bool,
    /// The most recently acquired historical ledger.
    pub(crate) hist_ledger: Option<Arc<Ledger>>,
    /// The ledger path-finding last ran against.
    pub(crate) path_ledger: Option<Arc<Ledger>>,
    pub(crate) path_find_jobs: usize,
    pub(crate) path_find_new_request: bool,
    /// Sequence of the last ledger a fetch pack was requested for.
    pub(crate) fetch_seq: Option<LedgerSeq>,
}

impl MasterState {
    /// Make `ledger` the valid ledger if it is ahead of the current one.
    ///
    /// Returns `None` if `ledger` is stale. Otherwise returns whether `ledger` also became the first
    /// published ledger.
    pub(crate) fn commit_valid(&mut self, ledger: Arc<Ledger>, sign_time: NetTime) -> Option<bool> {
        if self.valid.is_stale(ledger.seq()) {
            return None;
        }
        self.valid.set(ledger.clone(), sign_time);

        let first_publish = self.published.ledger.is_none();
        if first_publish {
            let close_time = ledger.close_time();
            self.published.set(ledger, close_time);
        }
        Some(first_publish)
    }

    /// Make `ledger` the published ledger if it is ahead of the current one and not ahead of the valid
    /// ledger. Returns whether the pointer moved.
    pub(crate) fn commit_published(&mut self, ledger: &Arc<Ledger>) -> bool {
        if self.published.is_stale(ledger.seq()) || ledger.seq() > self.valid.seq() {
            return false;
        }
        self.published.set(ledger.clone(), ledger.close_time());
        true
    }
}
