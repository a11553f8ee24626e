/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`LedgerMaster`]: the component that decides which ledger is valid, publishes validated ledgers in
//! order, and keeps local history complete.
//!
//! ## Pointers
//!
//! The ledger master keeps three ledger pointers:
//! 1. The **valid** ledger: the highest ledger known to have a quorum of trusted validations. It only
//!    ever moves forward. See [`finality`].
//! 2. The **published** ledger: the highest ledger delivered to subscribers. It only ever moves forward,
//!    normally one sequence at a time, and never passes the valid ledger. See [`advance`].
//! 3. The **closed** ledger: the last ledger local consensus closed.
//!
//! ## Complete ledgers
//!
//! The [`RangeTracker`](crate::range_tracker::RangeTracker) records which sequences have their ledgers
//! fully present locally and linked to the valid chain. [`backfill`] grows it backwards, and [`repair`]
//! shrinks it when a newly accepted ledger shows that some of it belongs to another chain.
//!
//! ## Concurrency
//!
//! All mutable state lives in one [`MasterState`](state::MasterState) behind one mutex. Operations are
//! written as a sequence of short critical sections. The mutex is never held across calls to
//! collaborators that may block or call back in: acquisitions, persistence, network sends, and job
//! scheduling all happen between critical sections, and any decision that depends on state read before
//! such a call is re-checked in the next critical section.

pub mod advance;

pub mod backfill;

pub mod finality;

pub mod path_finding;

pub mod repair;

pub(crate) mod state;

use std::{
    fmt::{self, Display, Formatter},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::Sender,
        Arc, Mutex, MutexGuard,
    },
    time::{Duration, SystemTime},
};

use ed25519_dalek::VerifyingKey;

use crate::{
    events::{AcquireLedgerEvent, Event, ReceiveFetchPackEvent},
    fetch_pack::{
        cache::FetchPackCache,
        client::{FetchPackClient, FetchPackReplyError},
        messages::FetchPackReply,
    },
    job_queue::JobType,
    networking::network::Network,
    pluggables::{AcquireReason, LedgerContext},
    service::Configuration,
    types::{
        data_types::{CryptoHash, LedgerSeq, NetTime},
        ledger::{Ledger, LedgerHeader},
    },
};

use state::MasterState;

pub use finality::CheckAccept;

/// Age reported for a ledger pointer that has never been set.
const UNKNOWN_AGE: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// Published ledgers older than this mean the node is not caught up.
const MAX_CAUGHT_UP_PUBLISHED_AGE: Duration = Duration::from_secs(3 * 60);

/// How far the valid ledger's sign time may run ahead of the published ledger's close time while the
/// node still counts as caught up.
const MAX_CAUGHT_UP_VALID_LEAD: Duration = Duration::from_secs(90);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedgerMasterError {
    /// A ledger needed by the operation is neither cached nor immediately acquirable.
    NotFound { hash: CryptoHash, seq: LedgerSeq },
    /// A locally held ledger failed its integrity check.
    Corrupt { hash: CryptoHash, seq: LedgerSeq },
    /// The job running the operation was cancelled.
    Cancelled,
    /// No connected peer advertises the ledgers a fetch pack was wanted for.
    PeerUnavailable { seq: LedgerSeq },
}

impl Display for LedgerMasterError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LedgerMasterError::NotFound { hash, seq } => {
                write!(f, "ledger {} at seq {} not found", hash, seq)
            }
            LedgerMasterError::Corrupt { hash, seq } => {
                write!(f, "ledger {} at seq {} is corrupt", hash, seq)
            }
            LedgerMasterError::Cancelled => write!(f, "job cancelled"),
            LedgerMasterError::PeerUnavailable { seq } => {
                write!(f, "no peer has the ledgers around seq {}", seq)
            }
        }
    }
}

/// Why [`LedgerMaster::is_caught_up`] judged the node not caught up with the network.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotCaughtUp {
    NoRecentPublishedLedger,
    NoCloseTimes,
    PublishedLedgerBehind,
}

pub struct LedgerMaster<N: Network> {
    config: Configuration,
    context: LedgerContext,
    state: Mutex<MasterState>,
    /// Sequence of the last valid ledger collaborators were told about. Taken before, never while
    /// holding, `state`.
    valid_notified: Mutex<Option<LedgerSeq>>,
    fetch_packs: FetchPackCache,
    fetch_pack_client: FetchPackClient<N>,
    amendment_blocked: AtomicBool,
    event_publisher: Option<Sender<Event>>,
}

impl<N: Network> LedgerMaster<N> {
    pub fn new(
        config: Configuration,
        context: LedgerContext,
        network: N,
        event_publisher: Option<Sender<Event>>,
    ) -> Arc<LedgerMaster<N>> {
        let fetch_packs =
            FetchPackCache::new(config.fetch_pack_cache_size, config.fetch_pack_cache_age);
        Arc::new(LedgerMaster {
            config,
            context,
            state: Mutex::new(MasterState::default()),
            valid_notified: Mutex::new(None),
            fetch_packs,
            fetch_pack_client: FetchPackClient::new(network),
            amendment_blocked: AtomicBool::new(false),
            event_publisher,
        })
    }

    /// Lock the sequence of the last valid ledger notified. Notifications are made while it is held, so
    /// that collaborators see valid ledgers in the order they were committed.
    pub(crate) fn lock_valid_notified(&self) -> MutexGuard<'_, Option<LedgerSeq>> {
        self.valid_notified
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn configuration(&self) -> &Configuration {
        &self.config
    }

    pub(crate) fn context(&self) -> &LedgerContext {
        &self.context
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, MasterState> {
        // Every critical section leaves the state consistent before doing anything that could panic.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn publish_event(&self, event: Event) {
        event.publish(&self.event_publisher)
    }

    /* ↓↓↓ Pointers ↓↓↓ */

    pub fn validated_ledger(&self) -> Option<Arc<Ledger>> {
        self.lock_state().valid.ledger.clone()
    }

    /// Sequence of the valid ledger, or 0 if there is none yet.
    pub fn valid_ledger_index(&self) -> LedgerSeq {
        self.lock_state().valid.seq()
    }

    pub fn published_ledger(&self) -> Option<Arc<Ledger>> {
        self.lock_state().published.ledger.clone()
    }

    /// Sequence of the published ledger, or 0 if there is none yet.
    pub fn published_ledger_index(&self) -> LedgerSeq {
        self.lock_state().published.seq()
    }

    pub fn closed_ledger(&self) -> Option<Arc<Ledger>> {
        self.lock_state().closed.clone()
    }

    /// The highest quorum-backed `(hash, seq)` reported to [`check_accept`](Self::check_accept).
    pub fn last_validated_candidate(&self) -> Option<(CryptoHash, LedgerSeq)> {
        self.lock_state().last_validation
    }

    /// Mark `seq` as being built by local consensus. Validations for it are not acted on until
    /// consensus finishes.
    pub fn set_building_ledger(&self, seq: LedgerSeq) {
        self.lock_state().building_seq = Some(seq);
    }

    pub fn building_ledger(&self) -> Option<LedgerSeq> {
        self.lock_state().building_seq
    }

    pub fn is_amendment_blocked(&self) -> bool {
        self.amendment_blocked.load(Ordering::Acquire)
    }

    /* ↓↓↓ Ages ↓↓↓ */

    /// Time since the valid ledger's sign time.
    pub fn validated_ledger_age(&self) -> Duration {
        let sign_time = self.lock_state().valid.time;
        self.age_of(sign_time)
    }

    /// Time since the published ledger's close time.
    pub fn published_ledger_age(&self) -> Duration {
        let close_time = self.lock_state().published.time;
        self.age_of(close_time)
    }

    fn age_of(&self, time: NetTime) -> Duration {
        if time.is_zero() {
            return UNKNOWN_AGE;
        }
        self.context.clock.close_time().duration_since(time)
    }

    /// Whether this node's published ledger is recent and close behind the valid ledger.
    pub fn is_caught_up(&self) -> Result<(), NotCaughtUp> {
        if self.published_ledger_age() > MAX_CAUGHT_UP_PUBLISHED_AGE {
            return Err(NotCaughtUp::NoRecentPublishedLedger);
        }
        let (valid_time, published_time) = {
            let state = self.lock_state();
            (state.valid.time, state.published.time)
        };
        if valid_time.is_zero() || published_time.is_zero() {
            return Err(NotCaughtUp::NoCloseTimes);
        }
        if valid_time > published_time + MAX_CAUGHT_UP_VALID_LEAD {
            return Err(NotCaughtUp::PublishedLedgerBehind);
        }
        Ok(())
    }

    /* ↓↓↓ Complete ledgers ↓↓↓ */

    pub fn have_ledger(&self, seq: LedgerSeq) -> bool {
        self.lock_state().complete.contains(seq)
    }

    pub fn have_range(&self, min: LedgerSeq, max: LedgerSeq) -> bool {
        self.lock_state().complete.contains_range(min, max)
    }

    /// The complete ledgers formatted as comma-separated intervals, e.g., `1-5,7`.
    pub fn complete_ledgers(&self) -> String {
        self.lock_state().complete.to_string()
    }

    pub fn clear_ledger(&self, seq: LedgerSeq) {
        self.lock_state().complete.clear_value(seq);
    }

    pub fn set_ledger_range_present(&self, min: LedgerSeq, max: LedgerSeq) {
        self.lock_state().complete.set_range(min, max);
    }

    /// Forget every ledger below `seq`.
    pub fn clear_prior_ledgers(&self, seq: LedgerSeq) {
        self.lock_state().complete.clear_prior(seq);
        self.context.ledger_cache.clear_prior(seq);
    }

    /// The contiguous run of complete ledgers that ends at the valid ledger.
    pub fn full_validated_range(&self) -> Option<(LedgerSeq, LedgerSeq)> {
        let state = self.lock_state();
        let max = state.valid.ledger.as_ref()?.seq();
        if !state.complete.contains(max) {
            return None;
        }
        let min = state
            .complete
            .prev_missing(max)
            .map(|missing| missing + 1)
            .unwrap_or_default();
        Some((min, max))
    }

    /// The oldest ledger this node serves fetch packs for.
    pub fn earliest_fetch(&self) -> LedgerSeq {
        let state = self.lock_state();
        let closed_seq = match &state.closed {
            Some(closed) => closed.seq(),
            None => state.valid.seq(),
        };
        closed_seq.saturating_sub(self.config.fetch_depth)
    }

    /* ↓↓↓ Ledger lookup ↓↓↓ */

    pub fn ledger_by_hash(&self, hash: &CryptoHash) -> Option<Arc<Ledger>> {
        if let Some(ledger) = self.context.ledger_cache.by_hash(hash) {
            return Some(ledger);
        }
        let state = self.lock_state();
        let pointed = [&state.closed, &state.valid.ledger, &state.published.ledger]
            .into_iter()
            .flatten()
            .find(|ledger| ledger.hash() == *hash)
            .cloned();
        pointed
    }

    /// The ledger on the valid chain at `seq`, if it is held locally.
    pub fn ledger_by_seq(&self, seq: LedgerSeq) -> Option<Arc<Ledger>> {
        let (valid, closed) = {
            let state = self.lock_state();
            (state.valid.ledger.clone(), state.closed.clone())
        };

        if let Some(valid) = &valid {
            if seq == valid.seq() {
                return Some(valid.clone());
            }
            if seq < valid.seq() {
                if let Some(hash) = valid.hash_of_seq(seq) {
                    return self.ledger_by_hash(&hash);
                }
            }
        }

        if let Some(ledger) = self.context.ledger_cache.by_seq(seq) {
            return Some(ledger);
        }
        closed.filter(|closed| closed.seq() == seq)
    }

    /// Hash of the ledger at `seq` according to the ledger cache's index or, failing that, the ledger
    /// store's.
    pub fn hash_by_seq(&self, seq: LedgerSeq) -> Option<CryptoHash> {
        self.context
            .ledger_cache
            .ledger_hash(seq)
            .or_else(|| self.context.ledger_store.hash_by_seq(seq))
    }

    /// Resolve the hash of the ancestor of `reference` at `seq`.
    ///
    /// Beyond `reference`'s skip list, hops to the oldest ancestor it lists, loading or acquiring that
    /// ancestor, and continues from there. Returns `Ok(None)` if an ancestor on the way cannot be
    /// obtained.
    pub fn hash_of_seq_from(
        &self,
        reference: &Arc<Ledger>,
        seq: LedgerSeq,
    ) -> Result<Option<CryptoHash>, LedgerMasterError> {
        let mut reference = reference.clone();
        loop {
            if seq > reference.seq() {
                return Ok(None);
            }
            if let Some(hash) = reference.hash_of_seq(seq) {
                return Ok(Some(hash));
            }

            let Some((ancestor_seq, ancestor_hash)) = reference.oldest_ancestor() else {
                return Ok(None);
            };
            let ancestor = match self.ledger_by_hash(&ancestor_hash) {
                Some(ancestor) => ancestor,
                None => match self.acquire(ancestor_hash, ancestor_seq, AcquireReason::Generic) {
                    Some(ancestor) => ancestor,
                    None => return Ok(None),
                },
            };
            if ancestor.hash() != ancestor_hash || !ancestor.is_intact() {
                return Err(LedgerMasterError::Corrupt {
                    hash: ancestor_hash,
                    seq: ancestor_seq,
                });
            }
            reference = ancestor;
        }
    }

    /// Resolve the hash of the ledger at `seq` on the valid chain.
    pub fn walk_hash_by_seq(&self, seq: LedgerSeq) -> Option<CryptoHash> {
        let valid = self.validated_ledger()?;
        match self.hash_of_seq_from(&valid, seq) {
            Ok(hash) => hash,
            Err(err) => {
                log::warn!("Walk to ledger {} failed: {}", seq, err);
                None
            }
        }
    }

    /// Close time of the ledger with `hash`, read from the ledger store's copy of its header.
    pub fn close_time_by_hash(&self, hash: &CryptoHash) -> Option<NetTime> {
        let bytes = self.context.ledger_store.fetch_node(hash)?;
        match LedgerHeader::deserialize_prefixed(&bytes) {
            Ok(header) if header.hash() == *hash => Some(header.close_time),
            Ok(_) => {
                log::warn!("Stored header does not match its hash");
                None
            }
            Err(err) => {
                log::warn!("Stored header is unreadable: {}", err);
                None
            }
        }
    }

    pub fn close_time_by_seq(&self, seq: LedgerSeq) -> Option<NetTime> {
        let hash = self.hash_by_seq(seq)?;
        self.close_time_by_hash(&hash)
    }

    /// Cache a ledger that is not (yet) known to be validated. Returns whether it was already cached.
    pub fn store_ledger(&self, ledger: Arc<Ledger>) -> bool {
        self.context.ledger_cache.insert(ledger, false)
    }

    /// Evict old entries from the ledger cache and the fetch pack cache.
    pub fn sweep(&self) {
        self.context.ledger_cache.sweep();
        let evicted = self.fetch_packs.sweep();
        if evicted > 0 {
            log::debug!("Swept {} fetch pack entries", evicted);
        }
    }

    /// Start acquiring a ledger from the network.
    pub(crate) fn acquire(
        &self,
        hash: CryptoHash,
        seq: LedgerSeq,
        reason: AcquireReason,
    ) -> Option<Arc<Ledger>> {
        self.publish_event(Event::AcquireLedger(AcquireLedgerEvent {
            timestamp: SystemTime::now(),
            ledger: hash,
            seq,
            reason,
        }));
        self.context.inbound_ledgers.acquire(hash, seq, reason)
    }

    /* ↓↓↓ Fetch packs ↓↓↓ */

    /// Store a fetch pack object under its claimed hash. Returns false, storing nothing, if `data` does
    /// not hash to `hash`.
    pub fn add_fetch_pack(&self, hash: CryptoHash, data: Vec<u8>) -> bool {
        self.fetch_packs.add(hash, data)
    }

    /// Take the fetch pack object stored under `hash`, if its data hashes to `hash`. Each object can be
    /// taken at most once.
    pub fn get_fetch_pack(&self, hash: &CryptoHash) -> Option<Vec<u8>> {
        self.fetch_packs.take(hash)
    }

    pub fn fetch_pack_cache_size(&self) -> usize {
        self.fetch_packs.len()
    }

    /// Store every object of a fetch pack received from `origin`, then tell pending acquisitions about it
    /// from a background job.
    ///
    /// The pack is dropped unless it answers the last fetch pack request sent, and holds at most
    /// `fetch_pack_max_objects` objects. Returns the number of objects stored.
    pub fn got_fetch_pack_reply(
        self: &Arc<Self>,
        origin: VerifyingKey,
        reply: FetchPackReply,
    ) -> Result<usize, FetchPackReplyError> {
        let max_objects = self.config.fetch_pack_max_objects;
        if let Err(err) = self.fetch_pack_client.accept_reply(origin, &reply, max_objects) {
            log::debug!("Dropped fetch pack from {:?}: {}", origin, err);
            return Err(err);
        }

        let objects = reply.objects.len();
        let stored = reply
            .objects
            .into_iter()
            .map(|object| self.add_fetch_pack(object.hash, object.data))
            .filter(|kept| *kept)
            .count();
        if stored < objects {
            log::warn!("{} of {} fetch pack objects had a wrong hash", objects - stored, objects);
        }

        self.publish_event(Event::ReceiveFetchPack(ReceiveFetchPackEvent {
            timestamp: SystemTime::now(),
            peer: origin,
            objects,
        }));

        let ledger_master = self.clone();
        self.context.scheduler.schedule(
            JobType::LedgerData,
            "gotFetchPack",
            Box::new(move |_| ledger_master.context.inbound_ledgers.got_fetch_pack()),
        );
        Ok(stored)
    }

    /// Ask a peer for the fetch pack that starts at `missing_seq`, whose ledger has hash `missing_hash`.
    pub fn request_fetch_pack(
        &self,
        missing_hash: CryptoHash,
        missing_seq: LedgerSeq,
    ) -> Result<VerifyingKey, LedgerMasterError> {
        let have_seq = missing_seq + 1;
        let have = self
            .ledger_hash_for_history(have_seq)?
            .ok_or(LedgerMasterError::NotFound {
                hash: CryptoHash::zero(),
                seq: have_seq,
            })?;

        match self
            .fetch_pack_client
            .request(have, missing_seq, &self.event_publisher)
        {
            Some(peer) => {
                log::trace!("Requested fetch pack for {} ({})", missing_seq, missing_hash);
                Ok(peer)
            }
            None => {
                log::debug!("No peer for fetch pack");
                Err(LedgerMasterError::PeerUnavailable { seq: missing_seq })
            }
        }
    }
}
