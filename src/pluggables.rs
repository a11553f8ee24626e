/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Traits for the collaborators that the [`LedgerMaster`](crate::ledger_master::LedgerMaster) relies on
//! but does not implement, and the [`LedgerContext`] that bundles them.
//!
//! Every collaborator is shared between the ledger master and its background jobs, so all of these
//! traits require `Send + Sync` and are held as `Arc<dyn ...>`. Implementations must not call back into
//! the ledger master from inside a trait method, with the exception of
//! [`InboundLedgers::got_fetch_pack`], which is always invoked from a background job.

use std::{collections::BTreeMap, sync::Arc, time::SystemTime};

use typed_builder::TypedBuilder;

use crate::{
    job_queue::JobScheduler,
    types::{
        data_types::{CryptoHash, Fee, LedgerSeq, NetTime},
        ledger::Ledger,
        validation::ValidationRecord,
    },
};

/* ↓↓↓ Validations ↓↓↓ */

/// Source of validations collected from the network.
pub trait ValidationTracker: Send + Sync {
    /// Signing times of the trusted validations for `ledger`.
    fn trusted_validation_times(&self, ledger: &CryptoHash) -> Vec<NetTime>;

    /// Number of trusted validations for `ledger`.
    fn trusted_count_for(&self, ledger: &CryptoHash) -> usize;

    /// The most recent trusted validation from every trusted validator.
    fn current_trusted(&self) -> Vec<ValidationRecord>;

    /// Fee samples carried by the trusted validations for `ledger`. Validations that carry no fee count
    /// as `base`.
    fn fees_for(&self, ledger: &CryptoHash, base: Fee) -> Vec<Fee>;

    /// Number of trusted validations needed to consider a ledger valid.
    fn quorum(&self) -> usize;
}

/* ↓↓↓ Ledgers ↓↓↓ */

/// Summary of the consensus round that built a ledger, recorded by the [`LedgerCache`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConsensusInfo {
    pub proposers: usize,
    pub round_time_ms: u64,
    pub close_time_agreed: bool,
}

/// In-memory store of recently seen ledgers. A default implementation is provided by
/// [`LedgerHistory`](crate::ledger_history::LedgerHistory).
pub trait LedgerCache: Send + Sync {
    fn by_hash(&self, hash: &CryptoHash) -> Option<Arc<Ledger>>;

    /// The validated ledger cached at `seq`.
    fn by_seq(&self, seq: LedgerSeq) -> Option<Arc<Ledger>>;

    /// Cache `ledger`, indexing it by sequence if `validated`. Returns whether the ledger was already
    /// cached.
    fn insert(&self, ledger: Arc<Ledger>, validated: bool) -> bool;

    /// Hash of the validated ledger indexed at `seq`.
    fn ledger_hash(&self, seq: LedgerSeq) -> Option<CryptoHash>;

    /// Told when `ledger` becomes the valid ledger.
    fn validated_ledger(&self, ledger: &Arc<Ledger>);

    /// Told when consensus has built `ledger` locally.
    fn built_ledger(&self, ledger: &Arc<Ledger>, info: ConsensusInfo);

    /// Evict old entries.
    fn sweep(&self);

    /// Drop the sequence index for every ledger below `seq`.
    fn clear_prior(&self, seq: LedgerSeq);
}

/// Why a ledger is being acquired from the network.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AcquireReason {
    /// Needed to make progress at or near the head of the chain.
    Generic,
    /// Needed to fill in history behind the published ledger.
    History,
}

/// Fetches ledgers from peers.
pub trait InboundLedgers: Send + Sync {
    /// Start (or continue) acquiring the ledger with `hash`. Returns the ledger if it is already
    /// complete.
    fn acquire(&self, hash: CryptoHash, seq: LedgerSeq, reason: AcquireReason) -> Option<Arc<Ledger>>;

    /// Whether a recent attempt to acquire `hash` failed.
    fn is_failure(&self, hash: &CryptoHash) -> bool;

    /// Told that fetch pack objects have arrived and may help pending acquisitions. Implementations
    /// take objects through [`LedgerMaster::get_fetch_pack`](crate::ledger_master::LedgerMaster::get_fetch_pack).
    fn got_fetch_pack(&self);
}

/// Persistent ledger store and sequence index.
pub trait LedgerStore: Send + Sync {
    /// Persist `ledger` as validated. Returns false if the ledger could not be saved.
    fn save_validated(&self, ledger: &Arc<Ledger>, synchronous: bool, current: bool) -> bool;

    /// Hash of the ledger the index holds at `seq`.
    fn hash_by_seq(&self, seq: LedgerSeq) -> Option<CryptoHash>;

    /// `(hash, parent hash)` of every indexed ledger in `[min, max]`.
    fn hashes_by_seq_range(
        &self,
        min: LedgerSeq,
        max: LedgerSeq,
    ) -> BTreeMap<LedgerSeq, (CryptoHash, CryptoHash)>;

    /// Raw bytes of a stored node, e.g., a prefixed ledger header keyed by the ledger's hash.
    fn fetch_node(&self, hash: &CryptoHash) -> Option<Vec<u8>>;
}

/// Tree nodes that a fetch pack is made of.
pub trait TreeNodeSource: Send + Sync {
    /// Up to `max_nodes` `(hash, bytes)` pairs of state tree nodes present in `want` but not in `have`.
    fn state_delta(&self, want: &Ledger, have: &Ledger, max_nodes: usize) -> Vec<(CryptoHash, Vec<u8>)>;

    /// Up to `max_nodes` `(hash, bytes)` pairs of `want`'s transaction tree nodes.
    fn tx_nodes(&self, want: &Ledger, max_nodes: usize) -> Vec<(CryptoHash, Vec<u8>)>;
}

/* ↓↓↓ Node services ↓↓↓ */

pub trait FeeTrack: Send + Sync {
    fn load_base(&self) -> Fee;

    fn set_remote_fee(&self, fee: Fee);

    /// Whether this node is too loaded to take on optional work.
    fn is_loaded_local(&self) -> bool;
}

pub trait AmendmentTable: Send + Sync {
    fn do_validated_ledger(&self, ledger: &Arc<Ledger>);

    /// Whether an amendment that this node does not support is enabled on the network.
    fn has_unsupported_enabled(&self) -> bool;
}

/// Operations-layer hooks.
pub trait NetworkOps: Send + Sync {
    /// Reconcile locally submitted transactions with the new valid ledger.
    fn update_local_tx(&self, ledger: &Arc<Ledger>);

    /// Deliver a published ledger to subscribers.
    fn pub_ledger(&self, ledger: &Arc<Ledger>);

    fn is_need_network_ledger(&self) -> bool;

    fn clear_need_network_ledger(&self);

    /// Told once that the node has become amendment blocked.
    fn set_amendment_blocked(&self);
}

/// A tree node needed for path-finding is not stored locally.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MissingNode {
    pub ledger: CryptoHash,
    pub seq: LedgerSeq,
}

/// Pending path-finding requests.
pub trait PathRequests: Send + Sync {
    fn requests_pending(&self) -> bool;

    /// Recompute every pending request against `ledger`, stopping early if `should_cancel` returns true.
    fn update_all(&self, ledger: &Arc<Ledger>, should_cancel: &dyn Fn() -> bool) -> Result<(), MissingNode>;
}

pub trait Clock: Send + Sync {
    /// Current network time.
    fn close_time(&self) -> NetTime;
}

/// [`Clock`] that reads the system clock and reports seconds since `epoch`.
pub struct SystemClock {
    epoch: SystemTime,
}

impl SystemClock {
    pub fn new(epoch: SystemTime) -> Self {
        Self { epoch }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(SystemTime::UNIX_EPOCH)
    }
}

impl Clock for SystemClock {
    fn close_time(&self) -> NetTime {
        let secs = SystemTime::now()
            .duration_since(self.epoch)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0);
        NetTime::new(secs)
    }
}

/// The collaborators of a [`LedgerMaster`](crate::ledger_master::LedgerMaster).
///
/// ```ignore
/// let context =
///     LedgerContext::builder()
///     .validations(validations)
///     .ledger_cache(Arc::new(LedgerHistory::new(256, Duration::from_secs(180))))
///     .inbound_ledgers(inbound)
///     .ledger_store(store)
///     .tree_nodes(tree_nodes)
///     .fee_track(fee_track)
///     .amendments(amendments)
///     .network_ops(network_ops)
///     .clock(Arc::new(SystemClock::default()))
///     .scheduler(Arc::new(JobQueue::new(4)))
///     .build()
/// ```
#[derive(Clone, TypedBuilder)]
pub struct LedgerContext {
    pub(crate) validations: Arc<dyn ValidationTracker>,
    pub(crate) ledger_cache: Arc<dyn LedgerCache>,
    pub(crate) inbound_ledgers: Arc<dyn InboundLedgers>,
    pub(crate) ledger_store: Arc<dyn LedgerStore>,
    pub(crate) tree_nodes: Arc<dyn TreeNodeSource>,
    pub(crate) fee_track: Arc<dyn FeeTrack>,
    pub(crate) amendments: Arc<dyn AmendmentTable>,
    pub(crate) network_ops: Arc<dyn NetworkOps>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) scheduler: Arc<dyn JobScheduler>,
    #[builder(default, setter(strip_option))]
    pub(crate) path_requests: Option<Arc<dyn PathRequests>>,
}
