/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Deciding which ledger is valid.
//!
//! A ledger becomes the valid ledger when a quorum of trusted validators have validated it and its
//! sequence is higher than the current valid ledger's. Validations arrive through
//! [`check_accept`](LedgerMaster::check_accept), and local consensus reports its result through
//! [`consensus_built`](LedgerMaster::consensus_built), which also reconciles the network's current
//! validations in case they favour a ledger other than the one consensus built.
//!
//! The valid ledger pointer never moves backwards. The first ledger to become valid is also the first
//! ledger to be published.

use std::{
    collections::BTreeMap,
    sync::{atomic::Ordering, Arc},
    time::SystemTime,
};

use crate::{
    events::{
        AmendmentBlockedEvent, ConsensusBuiltEvent, Event, PublishLedgerEvent, UpdateRemoteFeeEvent,
        ValidLedgerEvent,
    },
    networking::network::Network,
    pluggables::{AcquireReason, ConsensusInfo},
    types::{
        data_types::{CryptoHash, Fee, LedgerSeq, NetTime},
        ledger::Ledger,
    },
};

use super::LedgerMaster;

/// The outcome of offering a ledger to [`check_accept`](LedgerMaster::check_accept).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckAccept {
    /// The ledger became the valid ledger.
    Advanced,
    /// The ledger is not ahead of the valid ledger, or is the ledger local consensus is building.
    Stale,
    /// Too few trusted validations.
    InsufficientQuorum,
    /// The ledger is not held locally. Its acquisition has been started.
    NotFound,
}

/// The sign time of a ledger: the mean of the two middle values of the sorted trusted signing
/// `times` if there are at least `quorum` of them, else `close_time`.
pub fn sign_time(mut times: Vec<NetTime>, quorum: usize, close_time: NetTime) -> NetTime {
    let n = times.len();
    if n == 0 || n < quorum {
        return close_time;
    }
    times.sort_unstable();
    let t0 = times[(n - 1) / 2].secs();
    let t1 = times[n / 2].secs();
    NetTime::new(t0 + (t1 - t0) / 2)
}

/// The median of `fees`, or `base` if there are none.
pub fn median_fee(mut fees: Vec<Fee>, base: Fee) -> Fee {
    if fees.is_empty() {
        return base;
    }
    fees.sort_unstable();
    fees[fees.len() / 2]
}

impl<N: Network> LedgerMaster<N> {
    /// Number of trusted validations a ledger needs to become valid.
    pub fn needed_validations(&self) -> usize {
        if self.config.standalone {
            0
        } else {
            self.context.validations.quorum()
        }
    }

    pub(crate) fn sign_time_for(&self, ledger: &Ledger) -> NetTime {
        if self.config.standalone {
            return ledger.close_time();
        }
        let times = self
            .context
            .validations
            .trusted_validation_times(&ledger.hash());
        sign_time(times, self.needed_validations(), ledger.close_time())
    }

    fn trusted_count(&self, hash: &CryptoHash) -> usize {
        if self.config.standalone {
            return 0;
        }
        self.context.validations.trusted_count_for(hash)
    }

    /// Make `ledger` the valid ledger unconditionally, provided it is ahead of the current one.
    ///
    /// Returns whether the valid ledger moved.
    pub fn set_valid_ledger(self: &Arc<Self>, ledger: &Arc<Ledger>) -> bool {
        let sign_time = self.sign_time_for(ledger);
        ledger.set_validated();

        let committed = self.lock_state().commit_valid(ledger.clone(), sign_time);
        match committed {
            None => false,
            Some(first_publish) => {
                self.notify_valid_ledger(ledger, sign_time);
                if first_publish {
                    self.announce_published(ledger);
                }
                true
            }
        }
    }

    /// Offer the ledger with `hash` at `seq`, for which a trusted validation has just arrived. A `seq`
    /// of 0 means the sequence is not known.
    pub fn check_accept(self: &Arc<Self>, hash: CryptoHash, seq: LedgerSeq) -> CheckAccept {
        if seq.int() != 0 {
            let state = self.lock_state();
            if state.valid.is_stale(seq) || state.building_seq == Some(seq) {
                return CheckAccept::Stale;
            }
        }

        let count = self.trusted_count(&hash);
        let needed = self.needed_validations();
        if count < needed {
            log::trace!("Ledger {} has {} of {} validations", hash, count, needed);
            return CheckAccept::InsufficientQuorum;
        }

        if seq.int() != 0 {
            let mut state = self.lock_state();
            let better = state
                .last_validation
                .map_or(true, |(_, last_seq)| seq > last_seq);
            if better {
                state.last_validation = Some((hash, seq));
            }
        }

        let ledger = match self.ledger_by_hash(&hash) {
            Some(ledger) => ledger,
            None => match self.acquire(hash, seq, AcquireReason::Generic) {
                Some(ledger) => ledger,
                None => return CheckAccept::NotFound,
            },
        };

        self.check_accept_ledger(&ledger)
    }

    /// Offer `ledger` to become the valid ledger.
    pub fn check_accept_ledger(self: &Arc<Self>, ledger: &Arc<Ledger>) -> CheckAccept {
        if self.lock_state().valid.is_stale(ledger.seq()) {
            return CheckAccept::Stale;
        }

        let count = self.trusted_count(&ledger.hash());
        let needed = self.needed_validations();
        if count < needed {
            return CheckAccept::InsufficientQuorum;
        }

        let sign_time = self.sign_time_for(ledger);

        let first_publish = {
            let mut state = self.lock_state();
            // Another thread may have advanced the valid ledger since the check above.
            if state.valid.is_stale(ledger.seq()) {
                return CheckAccept::Stale;
            }
            ledger.set_validated();
            ledger.set_full();
            match state.commit_valid(ledger.clone(), sign_time) {
                Some(first_publish) => first_publish,
                None => return CheckAccept::Stale,
            }
        };

        log::info!(
            "Advancing accepted ledger to {} with {} validations",
            ledger.seq(),
            count
        );

        self.notify_valid_ledger(ledger, sign_time);

        if first_publish {
            self.set_full_ledger(ledger, true, true);
            self.announce_published(ledger);
        }

        let base = self.context.fee_track.load_base();
        let mut fees = self.context.validations.fees_for(&ledger.hash(), base);
        fees.extend(self.context.validations.fees_for(&ledger.parent_hash(), base));
        let fee = median_fee(fees, base);
        self.context.fee_track.set_remote_fee(fee);
        self.publish_event(Event::UpdateRemoteFee(UpdateRemoteFeeEvent {
            timestamp: SystemTime::now(),
            fee,
        }));

        self.try_advance();
        CheckAccept::Advanced
    }

    /// Tell the collaborators that track the valid ledger that `ledger` is now valid.
    ///
    /// Skipped if they have already been told about a later ledger, which happens when another thread
    /// commits a later valid ledger between this ledger's commit and this call.
    pub(crate) fn notify_valid_ledger(&self, ledger: &Arc<Ledger>, sign_time: NetTime) {
        let mut notified = self.lock_valid_notified();
        if matches!(*notified, Some(last) if last >= ledger.seq()) {
            log::debug!("Valid ledger {} superseded before notification", ledger.seq());
            return;
        }
        *notified = Some(ledger.seq());

        self.context.network_ops.update_local_tx(ledger);
        self.context.ledger_cache.validated_ledger(ledger);
        self.context.amendments.do_validated_ledger(ledger);

        self.publish_event(Event::ValidLedger(ValidLedgerEvent {
            timestamp: SystemTime::now(),
            ledger: ledger.hash(),
            seq: ledger.seq(),
            sign_time,
        }));

        if self.context.amendments.has_unsupported_enabled()
            && !self.amendment_blocked.swap(true, Ordering::AcqRel)
        {
            log::error!(
                "One or more unsupported amendments activated at ledger {}: server blocked",
                ledger.seq()
            );
            self.context.network_ops.set_amendment_blocked();
            self.publish_event(Event::AmendmentBlocked(AmendmentBlockedEvent {
                timestamp: SystemTime::now(),
                ledger: ledger.hash(),
                seq: ledger.seq(),
            }));
        }
    }

    /// Deliver a newly published ledger to subscribers.
    pub(crate) fn announce_published(&self, ledger: &Arc<Ledger>) {
        self.context.network_ops.pub_ledger(ledger);
        self.publish_event(Event::PublishLedger(PublishLedgerEvent {
            timestamp: SystemTime::now(),
            ledger: ledger.hash(),
            seq: ledger.seq(),
        }));
    }

    /// Told that local consensus has built `ledger`.
    ///
    /// If `ledger` itself has a quorum it becomes valid. Otherwise, the current trusted validations
    /// are grouped by ledger, and the highest ledger ahead of the valid ledger that more than a quorum
    /// of validators agree on is offered instead.
    pub fn consensus_built(self: &Arc<Self>, ledger: &Arc<Ledger>, info: ConsensusInfo) {
        self.lock_state().building_seq = None;

        if self.config.standalone {
            return;
        }

        self.context.ledger_cache.built_ledger(ledger, info);
        self.publish_event(Event::ConsensusBuilt(ConsensusBuiltEvent {
            timestamp: SystemTime::now(),
            ledger: ledger.hash(),
            seq: ledger.seq(),
        }));

        if self.lock_state().valid.is_stale(ledger.seq()) {
            log::trace!("Consensus built old ledger: {}", ledger.seq());
            return;
        }

        if self.check_accept_ledger(ledger) == CheckAccept::Advanced {
            return;
        }

        let needed = self.needed_validations();
        let valid_seq = self.valid_ledger_index();

        // Hash order breaks ties between groups at the same sequence.
        let mut groups: BTreeMap<CryptoHash, (Option<LedgerSeq>, usize)> = BTreeMap::new();
        for validation in self.context.validations.current_trusted() {
            let group = groups
                .entry(validation.ledger_hash)
                .or_insert((validation.seq, 0));
            if group.0.is_none() {
                group.0 = validation.seq;
            }
            group.1 += 1;
        }

        let mut best: Option<(CryptoHash, LedgerSeq)> = None;
        for (hash, (seq, count)) in groups {
            if count <= needed {
                continue;
            }
            let seq = match seq {
                Some(seq) => seq,
                None => match self.context.ledger_cache.by_hash(&hash) {
                    Some(cached) => cached.seq(),
                    None => continue,
                },
            };
            if seq <= valid_seq {
                continue;
            }
            if best.map_or(true, |(_, best_seq)| seq > best_seq) {
                best = Some((hash, seq));
            }
        }

        if let Some((hash, seq)) = best {
            log::debug!("Consensus built {}, validations favour {} at {}", ledger.seq(), hash, seq);
            self.check_accept(hash, seq);
        }
    }

    /// Record `closed` as the last closed ledger.
    ///
    /// In standalone mode the closed ledger is accepted and published directly.
    pub fn switch_lcl(self: &Arc<Self>, closed: &Arc<Ledger>) {
        self.lock_state().closed = Some(closed.clone());

        if self.config.standalone {
            self.set_full_ledger(closed, true, false);
            self.try_advance();
        } else {
            self.check_accept_ledger(closed);
        }
    }
}
