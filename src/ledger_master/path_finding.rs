/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Scheduling path-finding updates after the valid or closed ledger changes.
//!
//! Path-finding itself is done by the [`PathRequests`](crate::pluggables::PathRequests) collaborator.
//! This module only decides when to run it and against which ledger, and keeps at most
//! `max_path_find_jobs` update jobs queued or running at once.

use std::sync::Arc;

use crate::{
    job_queue::{Job, JobType},
    networking::network::Network,
    pluggables::{AcquireReason, MissingNode},
    types::ledger::Ledger,
};

use super::LedgerMaster;

impl<N: Network> LedgerMaster<N> {
    /// Schedule a path-finding update if there are pending requests and room for another job. Returns
    /// whether a job was scheduled.
    pub fn new_path_find_work(self: &Arc<Self>, name: &'static str) -> bool {
        let Some(path_requests) = &self.context.path_requests else {
            return false;
        };
        if !path_requests.requests_pending() {
            return false;
        }

        {
            let mut state = self.lock_state();
            if state.path_find_jobs >= self.config.max_path_find_jobs {
                return false;
            }
            state.path_find_jobs += 1;
        }

        let ledger_master = self.clone();
        let scheduled = self.context.scheduler.schedule(
            JobType::UpdatePaths,
            name,
            Box::new(move |job| ledger_master.update_paths(job)),
        );
        if !scheduled {
            let mut state = self.lock_state();
            state.path_find_jobs = state.path_find_jobs.saturating_sub(1);
        }
        scheduled
    }

    /// Told that a new path-finding request has arrived.
    pub fn new_path_request(self: &Arc<Self>) -> bool {
        self.lock_state().path_find_new_request = true;
        let scheduled = self.new_path_find_work("pf:newRequest");
        if !scheduled {
            self.lock_state().path_find_new_request = false;
        }
        scheduled
    }

    /// Whether a new path-finding request has arrived since the last call. Clears the flag.
    pub fn is_new_path_request(&self) -> bool {
        let mut state = self.lock_state();
        std::mem::take(&mut state.path_find_new_request)
    }

    /// Told that the order book database has been rebuilt. The next update runs against the valid ledger
    /// even if path-finding has already seen it.
    pub fn new_order_book_db(self: &Arc<Self>) -> bool {
        self.lock_state().path_ledger = None;
        self.new_path_find_work("pf:newOBDB")
    }

    fn update_paths(&self, job: &Job) {
        loop {
            if job.should_cancel() {
                break;
            }

            let Some(ledger) = self.next_path_ledger() else {
                break;
            };

            let age = self
                .context
                .clock
                .close_time()
                .duration_since(ledger.close_time());
            if age > self.config.max_path_find_age {
                log::debug!("Published ledger too old for updating paths");
                break;
            }

            let Some(path_requests) = &self.context.path_requests else {
                break;
            };
            if let Err(missing) = path_requests.update_all(&ledger, &|| job.should_cancel()) {
                self.acquire_for_path_finding(&ledger, missing);
                break;
            }
        }

        let mut state = self.lock_state();
        state.path_find_jobs = state.path_find_jobs.saturating_sub(1);
    }

    /// The ledger the next path-finding update should run against: the valid ledger if path-finding
    /// has not seen it yet, else the closed ledger if a new request arrived.
    fn next_path_ledger(&self) -> Option<Arc<Ledger>> {
        let mut state = self.lock_state();

        if let Some(valid) = state.valid.ledger.clone() {
            let seen = state
                .path_ledger
                .as_ref()
                .is_some_and(|path_ledger| path_ledger.seq() >= valid.seq());
            if !seen {
                state.path_ledger = Some(valid.clone());
                return Some(valid);
            }
        }

        if std::mem::take(&mut state.path_find_new_request) {
            return state.closed.clone().or_else(|| state.valid.ledger.clone());
        }
        None
    }

    fn acquire_for_path_finding(&self, ledger: &Arc<Ledger>, missing: MissingNode) {
        log::info!("Missing node in ledger {} detected during path finding", missing.seq);
        if ledger.is_open() {
            // An open ledger cannot be acquired; its parent holds the missing node.
            if let Some(parent_seq) = ledger.seq().prev() {
                self.acquire(ledger.parent_hash(), parent_seq, AcquireReason::Generic);
            }
        } else {
            self.acquire(missing.ledger, missing.seq, AcquireReason::Generic);
        }
    }
}
