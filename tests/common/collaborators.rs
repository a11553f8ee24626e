//! In-memory implementations of the ledger master's collaborators, which record how they were called.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        mpsc::{self, Receiver, Sender},
        Arc, Mutex,
    },
};

use ed25519_dalek::SigningKey;
use ledger_keeper::{
    job_queue::{Job, JobFn, JobScheduler, JobType},
    pluggables::{
        AcquireReason, AmendmentTable, Clock, FeeTrack, InboundLedgers, LedgerStore, MissingNode,
        NetworkOps, PathRequests, TreeNodeSource, ValidationTracker,
    },
    types::{
        crypto_primitives::sha256,
        data_types::{CryptoHash, Fee, LedgerSeq, NetTime},
        ledger::Ledger,
        validation::ValidationRecord,
    },
};
use rand_core::OsRng;

/* ↓↓↓ Validations ↓↓↓ */

#[derive(Default)]
struct Validations {
    times: HashMap<CryptoHash, Vec<NetTime>>,
    fees: HashMap<CryptoHash, Vec<Fee>>,
    current: Vec<ValidationRecord>,
}

pub(crate) struct MockValidations {
    quorum: usize,
    validations: Mutex<Validations>,
}

impl MockValidations {
    pub(crate) fn new(quorum: usize) -> MockValidations {
        MockValidations {
            quorum,
            validations: Mutex::new(Validations::default()),
        }
    }

    /// Record `count` trusted validations of `ledger`, each signed at the ledger's close time, from
    /// fresh validators.
    pub(crate) fn validate(&self, ledger: &Ledger, count: usize) {
        let mut validations = self.validations.lock().unwrap();
        for _ in 0..count {
            validations
                .times
                .entry(ledger.hash())
                .or_default()
                .push(ledger.close_time());
            validations.current.push(ValidationRecord {
                signer: SigningKey::generate(&mut OsRng).verifying_key(),
                ledger_hash: ledger.hash(),
                seq: Some(ledger.seq()),
                trusted: true,
                sign_time: ledger.close_time(),
                fee: None,
            });
        }
    }

    pub(crate) fn set_times(&self, ledger: &CryptoHash, times: Vec<NetTime>) {
        self.validations.lock().unwrap().times.insert(*ledger, times);
    }

    pub(crate) fn set_fees(&self, ledger: &CryptoHash, fees: Vec<Fee>) {
        self.validations.lock().unwrap().fees.insert(*ledger, fees);
    }

    /// Replace the current validations without touching the per-ledger counts.
    pub(crate) fn set_current(&self, current: Vec<ValidationRecord>) {
        self.validations.lock().unwrap().current = current;
    }
}

impl ValidationTracker for MockValidations {
    fn trusted_validation_times(&self, ledger: &CryptoHash) -> Vec<NetTime> {
        self.validations
            .lock()
            .unwrap()
            .times
            .get(ledger)
            .cloned()
            .unwrap_or_default()
    }

    fn trusted_count_for(&self, ledger: &CryptoHash) -> usize {
        self.trusted_validation_times(ledger).len()
    }

    fn current_trusted(&self) -> Vec<ValidationRecord> {
        self.validations.lock().unwrap().current.clone()
    }

    fn fees_for(&self, ledger: &CryptoHash, _base: Fee) -> Vec<Fee> {
        self.validations
            .lock()
            .unwrap()
            .fees
            .get(ledger)
            .cloned()
            .unwrap_or_default()
    }

    fn quorum(&self) -> usize {
        self.quorum
    }
}

/* ↓↓↓ Inbound ledgers ↓↓↓ */

#[derive(Default)]
pub(crate) struct MockInbound {
    acquisitions: Mutex<Vec<(LedgerSeq, AcquireReason)>>,
    available: Mutex<HashMap<CryptoHash, Arc<Ledger>>>,
    failures: Mutex<HashSet<CryptoHash>>,
    fetch_packs_received: AtomicUsize,
}

impl MockInbound {
    /// Make the next acquisition of `ledger` complete immediately.
    pub(crate) fn make_available(&self, ledger: &Arc<Ledger>) {
        self.available
            .lock()
            .unwrap()
            .insert(ledger.hash(), ledger.clone());
    }

    pub(crate) fn mark_failure(&self, hash: CryptoHash) {
        self.failures.lock().unwrap().insert(hash);
    }

    pub(crate) fn acquisitions(&self) -> Vec<(LedgerSeq, AcquireReason)> {
        self.acquisitions.lock().unwrap().clone()
    }

    pub(crate) fn acquired_seqs(&self) -> Vec<u32> {
        self.acquisitions()
            .into_iter()
            .map(|(seq, _)| seq.int())
            .collect()
    }

    pub(crate) fn fetch_packs_received(&self) -> usize {
        self.fetch_packs_received.load(Ordering::SeqCst)
    }
}

impl InboundLedgers for MockInbound {
    fn acquire(&self, hash: CryptoHash, seq: LedgerSeq, reason: AcquireReason) -> Option<Arc<Ledger>> {
        self.acquisitions.lock().unwrap().push((seq, reason));
        self.available.lock().unwrap().get(&hash).cloned()
    }

    fn is_failure(&self, hash: &CryptoHash) -> bool {
        self.failures.lock().unwrap().contains(hash)
    }

    fn got_fetch_pack(&self) {
        self.fetch_packs_received.fetch_add(1, Ordering::SeqCst);
    }
}

/* ↓↓↓ Ledger store ↓↓↓ */

#[derive(Default)]
pub(crate) struct MemLedgerStore {
    index: Mutex<BTreeMap<LedgerSeq, (CryptoHash, CryptoHash)>>,
    nodes: Mutex<HashMap<CryptoHash, Vec<u8>>>,
    saved: Mutex<Vec<LedgerSeq>>,
    fail_saves: AtomicBool,
}

impl MemLedgerStore {
    /// Index `ledger` as if it had been saved earlier.
    pub(crate) fn index(&self, ledger: &Ledger) {
        self.index
            .lock()
            .unwrap()
            .insert(ledger.seq(), (ledger.hash(), ledger.parent_hash()));
        self.nodes
            .lock()
            .unwrap()
            .insert(ledger.hash(), ledger.header().serialize_prefixed());
    }

    pub(crate) fn unindex(&self, seq: LedgerSeq) {
        self.index.lock().unwrap().remove(&seq);
    }

    pub(crate) fn put_node(&self, hash: CryptoHash, bytes: Vec<u8>) {
        self.nodes.lock().unwrap().insert(hash, bytes);
    }

    pub(crate) fn saved(&self) -> Vec<u32> {
        self.saved
            .lock()
            .unwrap()
            .iter()
            .map(|seq| seq.int())
            .collect()
    }

    pub(crate) fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

impl LedgerStore for MemLedgerStore {
    fn save_validated(&self, ledger: &Arc<Ledger>, _synchronous: bool, _current: bool) -> bool {
        if self.fail_saves.load(Ordering::SeqCst) {
            return false;
        }
        self.index(ledger);
        self.saved.lock().unwrap().push(ledger.seq());
        true
    }

    fn hash_by_seq(&self, seq: LedgerSeq) -> Option<CryptoHash> {
        self.index.lock().unwrap().get(&seq).map(|(hash, _)| *hash)
    }

    fn hashes_by_seq_range(
        &self,
        min: LedgerSeq,
        max: LedgerSeq,
    ) -> BTreeMap<LedgerSeq, (CryptoHash, CryptoHash)> {
        self.index
            .lock()
            .unwrap()
            .range(min..=max)
            .map(|(seq, hashes)| (*seq, *hashes))
            .collect()
    }

    fn fetch_node(&self, hash: &CryptoHash) -> Option<Vec<u8>> {
        self.nodes.lock().unwrap().get(hash).cloned()
    }
}

/* ↓↓↓ Tree nodes ↓↓↓ */

/// Makes up `state_nodes` state tree nodes and `tx_nodes` transaction tree nodes for every ledger.
pub(crate) struct FakeTreeNodes {
    state_nodes: usize,
    tx_nodes: usize,
}

impl FakeTreeNodes {
    pub(crate) fn new(state_nodes: usize, tx_nodes: usize) -> FakeTreeNodes {
        FakeTreeNodes {
            state_nodes,
            tx_nodes,
        }
    }

    fn nodes(kind: &str, ledger: &Ledger, count: usize) -> Vec<(CryptoHash, Vec<u8>)> {
        (0..count)
            .map(|i| {
                let data = format!("{} node {} of ledger {}", kind, i, ledger.seq()).into_bytes();
                (sha256(&data), data)
            })
            .collect()
    }
}

impl TreeNodeSource for FakeTreeNodes {
    fn state_delta(&self, want: &Ledger, _have: &Ledger, max_nodes: usize) -> Vec<(CryptoHash, Vec<u8>)> {
        FakeTreeNodes::nodes("state", want, self.state_nodes.min(max_nodes))
    }

    fn tx_nodes(&self, want: &Ledger, max_nodes: usize) -> Vec<(CryptoHash, Vec<u8>)> {
        FakeTreeNodes::nodes("tx", want, self.tx_nodes.min(max_nodes))
    }
}

/* ↓↓↓ Node services ↓↓↓ */

pub(crate) struct MockFeeTrack {
    base: Fee,
    remote: Mutex<Option<Fee>>,
    loaded: AtomicBool,
}

impl MockFeeTrack {
    pub(crate) fn new(base: Fee) -> MockFeeTrack {
        MockFeeTrack {
            base,
            remote: Mutex::new(None),
            loaded: AtomicBool::new(false),
        }
    }

    pub(crate) fn remote_fee(&self) -> Option<Fee> {
        *self.remote.lock().unwrap()
    }

    pub(crate) fn set_loaded(&self, loaded: bool) {
        self.loaded.store(loaded, Ordering::SeqCst);
    }
}

impl FeeTrack for MockFeeTrack {
    fn load_base(&self) -> Fee {
        self.base
    }

    fn set_remote_fee(&self, fee: Fee) {
        *self.remote.lock().unwrap() = Some(fee);
    }

    fn is_loaded_local(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub(crate) struct MockAmendments {
    unsupported_enabled: AtomicBool,
    validated: AtomicUsize,
}

impl MockAmendments {
    pub(crate) fn enable_unsupported(&self) {
        self.unsupported_enabled.store(true, Ordering::SeqCst);
    }

    pub(crate) fn validated(&self) -> usize {
        self.validated.load(Ordering::SeqCst)
    }
}

impl AmendmentTable for MockAmendments {
    fn do_validated_ledger(&self, _ledger: &Arc<Ledger>) {
        self.validated.fetch_add(1, Ordering::SeqCst);
    }

    fn has_unsupported_enabled(&self) -> bool {
        self.unsupported_enabled.load(Ordering::SeqCst)
    }
}

/// Blocks `update_local_tx` for one sequence: signals `entered`, then waits on `release`.
struct LocalTxHold {
    seq: LedgerSeq,
    entered: Sender<()>,
    release: Receiver<()>,
}

#[derive(Default)]
pub(crate) struct RecordingOps {
    published: Mutex<Vec<LedgerSeq>>,
    local_tx_hold: Mutex<Option<LocalTxHold>>,
    local_tx_updates: AtomicUsize,
    need_network_cleared: AtomicUsize,
    amendment_blocked: AtomicUsize,
}

impl RecordingOps {
    pub(crate) fn published(&self) -> Vec<u32> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|seq| seq.int())
            .collect()
    }

    /// Make the next `update_local_tx` call for `seq` block until the returned sender is used. The
    /// returned receiver gets a message once that call has started.
    pub(crate) fn hold_local_tx(&self, seq: LedgerSeq) -> (Receiver<()>, Sender<()>) {
        let (entered, entered_receiver) = mpsc::channel();
        let (release_sender, release) = mpsc::channel();
        *self.local_tx_hold.lock().unwrap() = Some(LocalTxHold {
            seq,
            entered,
            release,
        });
        (entered_receiver, release_sender)
    }

    pub(crate) fn local_tx_updates(&self) -> usize {
        self.local_tx_updates.load(Ordering::SeqCst)
    }

    pub(crate) fn need_network_cleared(&self) -> usize {
        self.need_network_cleared.load(Ordering::SeqCst)
    }

    pub(crate) fn amendment_blocked(&self) -> usize {
        self.amendment_blocked.load(Ordering::SeqCst)
    }
}

impl NetworkOps for RecordingOps {
    fn update_local_tx(&self, ledger: &Arc<Ledger>) {
        self.local_tx_updates.fetch_add(1, Ordering::SeqCst);

        let hold = {
            let mut hold = self.local_tx_hold.lock().unwrap();
            match hold.take() {
                Some(held) if held.seq == ledger.seq() => Some(held),
                other => {
                    *hold = other;
                    None
                }
            }
        };
        if let Some(hold) = hold {
            let _ = hold.entered.send(());
            let _ = hold.release.recv();
        }
    }

    fn pub_ledger(&self, ledger: &Arc<Ledger>) {
        self.published.lock().unwrap().push(ledger.seq());
    }

    fn is_need_network_ledger(&self) -> bool {
        false
    }

    fn clear_need_network_ledger(&self) {
        self.need_network_cleared.fetch_add(1, Ordering::SeqCst);
    }

    fn set_amendment_blocked(&self) {
        self.amendment_blocked.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub(crate) struct RecordingPaths {
    pending: AtomicBool,
    updates: Mutex<Vec<LedgerSeq>>,
    missing: Mutex<Option<MissingNode>>,
}

impl RecordingPaths {
    pub(crate) fn set_pending(&self, pending: bool) {
        self.pending.store(pending, Ordering::SeqCst);
    }

    /// Make the next update fail with `missing`.
    pub(crate) fn fail_next_with(&self, missing: MissingNode) {
        *self.missing.lock().unwrap() = Some(missing);
    }

    pub(crate) fn updates(&self) -> Vec<u32> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .map(|seq| seq.int())
            .collect()
    }
}

impl PathRequests for RecordingPaths {
    fn requests_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    fn update_all(&self, ledger: &Arc<Ledger>, _should_cancel: &dyn Fn() -> bool) -> Result<(), MissingNode> {
        self.updates.lock().unwrap().push(ledger.seq());
        match self.missing.lock().unwrap().take() {
            Some(missing) => Err(missing),
            None => Ok(()),
        }
    }
}

/// A [`Clock`] that only moves when told to.
pub(crate) struct ManualClock(AtomicU64);

impl ManualClock {
    pub(crate) fn new(now: NetTime) -> ManualClock {
        ManualClock(AtomicU64::new(now.secs()))
    }

    pub(crate) fn set(&self, now: NetTime) {
        self.0.store(now.secs(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn close_time(&self) -> NetTime {
        NetTime::new(self.0.load(Ordering::SeqCst))
    }
}

/* ↓↓↓ Scheduling ↓↓↓ */

/// A [`JobScheduler`] that runs every job to completion on the scheduling thread.
#[derive(Default)]
pub(crate) struct ImmediateScheduler {
    scheduled: Mutex<Vec<(JobType, &'static str)>>,
}

impl ImmediateScheduler {
    pub(crate) fn scheduled(&self) -> Vec<(JobType, &'static str)> {
        self.scheduled.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, name: &str) -> usize {
        self.scheduled
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, scheduled)| *scheduled == name)
            .count()
    }
}

impl JobScheduler for ImmediateScheduler {
    fn schedule(&self, job_type: JobType, name: &'static str, job: JobFn) -> bool {
        self.scheduled.lock().unwrap().push((job_type, name));
        job(&Job::new(job_type, name, Arc::new(AtomicBool::new(false))));
        true
    }

    fn job_count(&self, _job_type: JobType) -> usize {
        0
    }
}
