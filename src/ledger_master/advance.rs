/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Publishing validated ledgers, and acquiring history once publishing has caught up.
//!
//! ## Advance passes
//!
//! Work is requested through [`try_advance`](LedgerMaster::try_advance), which sets a pending-work flag
//! and, if no advance job is running, schedules one. The job repeatedly clears the flag and runs one
//! pass, until a pass finds the flag still clear. The flag is checked and the running flag cleared in
//! the same critical section, so a request made while the last pass is finishing is never lost. At most
//! one advance job runs at a time.
//!
//! A pass first looks for [ledgers to publish](LedgerMaster::find_new_ledgers_to_publish):
//! 1. If nothing has been published, the valid ledger.
//! 2. If the valid ledger is more than `max_ledger_gap` ahead of the published ledger, the valid
//!    ledger alone. Publishing skips the gap.
//! 3. Otherwise, the contiguous run of locally held ledgers from the one after the published ledger up
//!    to the valid ledger. Up to `ledger_fetch_size` missing ledgers in the run are acquired per pass.
//!
//! If there is nothing to publish, and the node is caught up, the pass acquires the newest ledger
//! missing from local history instead, and starts a [backfill](super::backfill) from it.

use std::{sync::Arc, time::SystemTime};

use crate::{
    events::{AcceptLedgerEvent, Event, SkipGapEvent},
    job_queue::{Job, JobType},
    networking::network::Network,
    pluggables::AcquireReason,
    types::{
        data_types::{CryptoHash, LedgerSeq},
        ledger::Ledger,
    },
};

use super::{LedgerMaster, LedgerMasterError};

/// Whether a ledger at `candidate` is recent enough to keep, given that the valid ledger is at
/// `current` and `ledger_history` ledgers of history are kept.
pub fn should_acquire(current: LedgerSeq, ledger_history: u32, candidate: LedgerSeq) -> bool {
    candidate >= current || current - candidate <= ledger_history
}

impl<N: Network> LedgerMaster<N> {
    /// Ask for an advance pass.
    pub fn try_advance(self: &Arc<Self>) {
        let start = {
            let mut state = self.lock_state();
            state.advance_work = true;
            if !state.advance_running && state.valid.ledger.is_some() {
                state.advance_running = true;
                true
            } else {
                false
            }
        };

        if start {
            let ledger_master = self.clone();
            let scheduled = self.context.scheduler.schedule(
                JobType::Advance,
                "advanceLedger",
                Box::new(move |job| ledger_master.advance_thread(job)),
            );
            if !scheduled {
                self.lock_state().advance_running = false;
            }
        }
    }

    fn advance_thread(self: &Arc<Self>, job: &Job) {
        loop {
            {
                let mut state = self.lock_state();
                if !state.advance_work || job.should_cancel() {
                    state.advance_running = false;
                    return;
                }
                state.advance_work = false;
            }

            match self.advance_pass(job) {
                Ok(true) => self.lock_state().advance_work = true,
                Ok(false) => (),
                Err(LedgerMasterError::Cancelled) => {
                    log::debug!("Advance job cancelled");
                    self.lock_state().advance_running = false;
                    return;
                }
                Err(err) => {
                    log::error!("Advance pass failed: {}", err);
                    self.lock_state().advance_running = false;
                    return;
                }
            }
        }
    }

    /// One advance pass. Returns whether it made progress that could let another pass do more.
    fn advance_pass(self: &Arc<Self>, job: &Job) -> Result<bool, LedgerMasterError> {
        let to_publish = self.find_new_ledgers_to_publish()?;
        if to_publish.is_empty() {
            return self.advance_history(job);
        }

        for ledger in to_publish {
            if job.should_cancel() {
                return Err(LedgerMasterError::Cancelled);
            }

            log::debug!("Publishing ledger {}", ledger.seq());
            self.set_full_ledger(&ledger, true, true);

            let moved = self.lock_state().commit_published(&ledger);
            if moved {
                self.announce_published(&ledger);
            }
        }

        self.context.network_ops.clear_need_network_ledger();
        self.new_path_find_work("pf:newLedger");
        Ok(true)
    }

    /// The ledgers that should be published next, in order.
    pub fn find_new_ledgers_to_publish(&self) -> Result<Vec<Arc<Ledger>>, LedgerMasterError> {
        let (valid, published) = {
            let state = self.lock_state();
            (state.valid.ledger.clone(), state.published.ledger.clone())
        };

        let Some(valid) = valid else {
            return Ok(Vec::new());
        };
        let Some(published) = published else {
            log::info!("First published ledger will be {}", valid.seq());
            return Ok(vec![valid]);
        };

        let valid_seq = valid.seq();
        let pub_seq = published.seq();

        if valid_seq > pub_seq + self.config.max_ledger_gap {
            log::warn!("Gap in validated ledger stream {} - {}", pub_seq, valid_seq);
            self.publish_event(Event::SkipGap(SkipGapEvent {
                timestamp: SystemTime::now(),
                published_seq: pub_seq,
                valid_seq,
            }));
            return Ok(vec![valid]);
        }

        if valid_seq <= pub_seq {
            return Ok(Vec::new());
        }

        let mut to_publish = Vec::new();
        let mut next_seq = pub_seq + 1;
        let mut acquisitions = 0;

        for seq in (pub_seq.int() + 1)..=valid_seq.int() {
            let seq = LedgerSeq::new(seq);

            let ledger = if seq == valid_seq {
                Some(valid.clone())
            } else {
                let Some(hash) = self.hash_of_seq_from(&valid, seq)? else {
                    log::error!("Ledger {} on the valid chain has no known hash", seq);
                    break;
                };
                match self.context.ledger_cache.by_hash(&hash) {
                    Some(ledger) => Some(ledger),
                    None => {
                        acquisitions += 1;
                        if acquisitions > self.config.ledger_fetch_size {
                            break;
                        }
                        self.acquire(hash, seq, AcquireReason::Generic)
                    }
                }
            };

            // Only a run with no holes can be published. Later ledgers were still worth acquiring.
            if let Some(ledger) = ledger {
                if ledger.seq() == next_seq {
                    ledger.set_validated();
                    to_publish.push(ledger);
                    next_seq += 1;
                }
            }
        }

        if !to_publish.is_empty() {
            log::debug!("Ready to publish {} ledgers", to_publish.len());
        }
        Ok(to_publish)
    }

    /// Record `ledger` as validated, full, and present, persisting it through the ledger store.
    ///
    /// `synchronous` asks the store to persist before returning. `current` means `ledger` is at or near
    /// the head of the chain, rather than part of history being filled in.
    pub fn set_full_ledger(self: &Arc<Self>, ledger: &Arc<Ledger>, synchronous: bool, current: bool) {
        ledger.set_validated();
        ledger.set_full();

        if current {
            self.context.ledger_cache.insert(ledger.clone(), true);
        }

        let seq = ledger.seq();
        if let Some(prev_seq) = seq.prev() {
            if let Some(stored) = self.context.ledger_store.hash_by_seq(prev_seq) {
                if !stored.is_zero() && stored != ledger.parent_hash() {
                    log::warn!("Invalid ledger index at {}, expected {}", prev_seq, ledger.parent_hash());
                    self.clear_ledger(prev_seq);
                }
            }
        }

        if !self
            .context
            .ledger_store
            .save_validated(ledger, synchronous, current)
        {
            self.failed_save(seq, ledger.hash());
            return;
        }

        let ahead = !self.lock_state().valid.is_stale(seq);
        let sign_time = if ahead {
            self.sign_time_for(ledger)
        } else {
            ledger.close_time()
        };

        let (valid_moved, first_publish) = {
            let mut state = self.lock_state();
            state.complete.set_value(seq);
            match state.commit_valid(ledger.clone(), sign_time) {
                Some(first_publish) => (true, first_publish),
                None => (false, false),
            }
        };

        self.publish_event(Event::AcceptLedger(AcceptLedgerEvent {
            timestamp: SystemTime::now(),
            ledger: ledger.hash(),
            seq,
        }));

        if valid_moved {
            self.notify_valid_ledger(ledger, sign_time);
        }
        if first_publish {
            self.announce_published(ledger);
        }

        if let Some(prev_seq) = seq.prev() {
            if self.have_ledger(prev_seq) {
                let prev_ok = self
                    .ledger_by_seq(prev_seq)
                    .is_some_and(|prev| prev.hash() == ledger.parent_hash());
                if !prev_ok {
                    log::warn!("Ledger {} invalidates the previous ledger", seq);
                    self.fix_mismatch(ledger);
                }
            }
        }
    }

    fn failed_save(&self, seq: LedgerSeq, hash: CryptoHash) {
        log::error!("Failed to save ledger {} ({}), reacquiring", seq, hash);
        self.clear_ledger(seq);
        self.acquire(hash, seq, AcquireReason::Generic);
    }

    fn history_eligible(&self) -> bool {
        if self.config.standalone || self.context.fee_track.is_loaded_local() {
            return false;
        }
        if self.context.scheduler.job_count(JobType::PubOldLedger) >= self.config.max_old_ledger_jobs {
            return false;
        }
        let caught_up = {
            let state = self.lock_state();
            state.valid.ledger.is_some() && state.valid.seq() == state.published.seq()
        };
        caught_up && self.validated_ledger_age() < self.config.max_ledger_age_acquire
    }

    /// Acquire the newest ledger missing below the published ledger. Returns whether progress was made.
    fn advance_history(self: &Arc<Self>, job: &Job) -> Result<bool, LedgerMasterError> {
        if !self.history_eligible() {
            self.lock_state().hist_ledger = None;
            return Ok(false);
        }

        let (valid_seq, missing, fill_in_progress) = {
            let state = self.lock_state();
            (
                state.valid.seq(),
                state.complete.prev_missing(state.published.seq()),
                state.fill_in_progress,
            )
        };

        let Some(missing) = missing.filter(|missing| missing.int() != 0) else {
            return Ok(false);
        };
        if !should_acquire(valid_seq, self.config.ledger_history, missing) {
            log::trace!("History ledger {} is older than the history kept", missing);
            return Ok(false);
        }
        if fill_in_progress.is_some_and(|fill| missing <= fill) {
            return Ok(false);
        }

        let mut progress = false;
        log::trace!("Acquiring history ledger {}", missing);

        match self.ledger_hash_for_history(missing)? {
            Some(hash) => {
                let ledger = match self.context.ledger_cache.by_hash(&hash) {
                    Some(ledger) => Some(ledger),
                    None if self.context.inbound_ledgers.is_failure(&hash) => {
                        log::debug!("History ledger {} is a known failure", missing);
                        None
                    }
                    None => {
                        let ledger = self.acquire(hash, missing, AcquireReason::History);
                        if ledger.is_none() {
                            self.maybe_request_fetch_pack(hash, missing);
                        }
                        ledger
                    }
                };

                match ledger {
                    Some(ledger) => {
                        self.set_full_ledger(&ledger, false, false);
                        self.start_fill_from(ledger);
                        progress = true;
                    }
                    None => self.prefetch_history(job, missing)?,
                }
            }
            None => {
                let following = missing + 1;
                log::error!("Can't find the hash of history ledger {}", missing);
                let cleared = {
                    let mut state = self.lock_state();
                    let held = state.complete.contains(following);
                    state.complete.clear_value(following);
                    held
                };
                progress = cleared;
            }
        }

        if self.valid_ledger_index() != self.published_ledger_index() {
            progress = true;
        }
        Ok(progress)
    }

    fn maybe_request_fetch_pack(&self, hash: CryptoHash, missing: LedgerSeq) {
        if missing <= LedgerSeq::new(self.config.fetch_pack_min_seq) {
            return;
        }
        {
            let mut state = self.lock_state();
            if state.fetch_seq == Some(missing) {
                return;
            }
            state.fetch_seq = Some(missing);
        }
        if let Err(err) = self.request_fetch_pack(hash, missing) {
            log::debug!("Fetch pack for {} not requested: {}", missing, err);
        }
    }

    /// Remember `ledger` as the history ledger and, if its parent is already indexed in the store and
    /// no backfill is running, start a backfill from it.
    fn start_fill_from(self: &Arc<Self>, ledger: Arc<Ledger>) {
        let idle = {
            let mut state = self.lock_state();
            state.hist_ledger = Some(ledger.clone());
            state.fill_in_progress.is_none()
        };
        if !idle {
            return;
        }

        let Some(prev_seq) = ledger.seq().prev() else {
            return;
        };
        if self.context.ledger_store.hash_by_seq(prev_seq) != Some(ledger.parent_hash()) {
            return;
        }

        let claimed = {
            let mut state = self.lock_state();
            if state.fill_in_progress.is_none() {
                state.fill_in_progress = Some(ledger.seq());
                true
            } else {
                false
            }
        };
        if claimed {
            self.schedule_fill(ledger);
        }
    }

    fn prefetch_history(&self, job: &Job, missing: LedgerSeq) -> Result<(), LedgerMasterError> {
        for distance in 1..=self.config.ledger_fetch_size as u32 {
            if job.should_cancel() {
                return Err(LedgerMasterError::Cancelled);
            }
            let Some(seq) = missing.int().checked_sub(distance).map(LedgerSeq::new) else {
                break;
            };
            if let Some(hash) = self.ledger_hash_for_history(seq)? {
                if !self.context.inbound_ledgers.is_failure(&hash) {
                    self.acquire(hash, seq, AcquireReason::History);
                }
            }
        }
        Ok(())
    }

    /// Resolve the hash of the ledger at `seq`, starting from the history ledger if it reaches that far
    /// back, else from the valid ledger.
    pub fn ledger_hash_for_history(&self, seq: LedgerSeq) -> Result<Option<CryptoHash>, LedgerMasterError> {
        let (hist, valid) = {
            let state = self.lock_state();
            (state.hist_ledger.clone(), state.valid.ledger.clone())
        };

        if let Some(hist) = hist.filter(|hist| hist.seq() >= seq) {
            if let Some(hash) = self.hash_of_seq_from(&hist, seq)? {
                return Ok(Some(hash));
            }
        }
        match valid {
            Some(valid) => self.hash_of_seq_from(&valid, seq),
            None => Ok(None),
        }
    }
}
