//! A ledger master wired to in-memory collaborators.

use std::{
    sync::{
        mpsc::{self, Receiver},
        Arc,
    },
    time::Duration,
};

use ledger_keeper::{
    events::Event,
    job_queue::JobScheduler,
    ledger_history::LedgerHistory,
    ledger_master::{CheckAccept, LedgerMaster},
    pluggables::{LedgerCache, LedgerContext},
    service::Configuration,
    types::{
        data_types::{Fee, NetTime},
        ledger::Ledger,
    },
};

use super::{
    chain::close_time_of,
    collaborators::*,
    network::NetworkStub,
};

pub(crate) const QUORUM: usize = 3;

pub(crate) const BASE_FEE: Fee = Fee::new(10);

pub(crate) struct Harness {
    pub(crate) validations: Arc<MockValidations>,
    pub(crate) cache: Arc<LedgerHistory>,
    pub(crate) inbound: Arc<MockInbound>,
    pub(crate) store: Arc<MemLedgerStore>,
    pub(crate) fee_track: Arc<MockFeeTrack>,
    pub(crate) amendments: Arc<MockAmendments>,
    pub(crate) ops: Arc<RecordingOps>,
    pub(crate) paths: Arc<RecordingPaths>,
    pub(crate) clock: Arc<ManualClock>,
    pub(crate) scheduler: Arc<ImmediateScheduler>,
    pub(crate) network: NetworkStub,
    tree_nodes: Arc<FakeTreeNodes>,
}

impl Harness {
    pub(crate) fn new() -> Harness {
        Harness::with_tree_nodes(FakeTreeNodes::new(0, 0))
    }

    pub(crate) fn with_tree_nodes(tree_nodes: FakeTreeNodes) -> Harness {
        Harness {
            validations: Arc::new(MockValidations::new(QUORUM)),
            cache: Arc::new(LedgerHistory::new(4096, Duration::from_secs(600))),
            inbound: Arc::new(MockInbound::default()),
            store: Arc::new(MemLedgerStore::default()),
            fee_track: Arc::new(MockFeeTrack::new(BASE_FEE)),
            amendments: Arc::new(MockAmendments::default()),
            ops: Arc::new(RecordingOps::default()),
            paths: Arc::new(RecordingPaths::default()),
            clock: Arc::new(ManualClock::new(NetTime::new(0))),
            scheduler: Arc::new(ImmediateScheduler::default()),
            network: NetworkStub::new(),
            tree_nodes: Arc::new(tree_nodes),
        }
    }

    pub(crate) fn context(&self) -> LedgerContext {
        self.context_with(self.scheduler.clone())
    }

    /// Like [`Harness::context`], but running jobs on `scheduler`.
    pub(crate) fn context_with(&self, scheduler: Arc<dyn JobScheduler>) -> LedgerContext {
        LedgerContext::builder()
            .validations(self.validations.clone())
            .ledger_cache(self.cache.clone())
            .inbound_ledgers(self.inbound.clone())
            .ledger_store(self.store.clone())
            .tree_nodes(self.tree_nodes.clone())
            .fee_track(self.fee_track.clone())
            .amendments(self.amendments.clone())
            .network_ops(self.ops.clone())
            .clock(self.clock.clone())
            .scheduler(scheduler)
            .path_requests(self.paths.clone())
            .build()
    }

    /// Start a ledger master, and return it together with the receiving end of its events.
    pub(crate) fn start(
        &self,
        configuration: Configuration,
    ) -> (Arc<LedgerMaster<NetworkStub>>, Receiver<Event>) {
        let (event_publisher, event_subscriber) = mpsc::channel();
        let ledger_master = LedgerMaster::new(
            configuration,
            self.context(),
            self.network.clone(),
            Some(event_publisher),
        );
        (ledger_master, event_subscriber)
    }

    /// Put the ledgers in the cache without marking them validated.
    pub(crate) fn cache_ledgers<'a>(&self, ledgers: impl IntoIterator<Item = &'a Arc<Ledger>>) {
        for ledger in ledgers {
            self.cache.insert(ledger.clone(), false);
        }
    }

    /// Move the clock to shortly after `ledger` closed.
    pub(crate) fn clock_after(&self, ledger: &Ledger) {
        self.clock.set(close_time_of(ledger.seq().int()) + Duration::from_secs(2));
    }
}

/// Every event published so far.
pub(crate) fn drain(events: &Receiver<Event>) -> Vec<Event> {
    events.try_iter().collect()
}

/// Advance `ledger_master` to `ledger`, which must be cached, by giving it a quorum of validations.
pub(crate) fn validate_and_accept(
    harness: &Harness,
    ledger_master: &Arc<LedgerMaster<NetworkStub>>,
    ledger: &Arc<Ledger>,
) -> CheckAccept {
    harness.validations.validate(ledger, QUORUM);
    harness.clock_after(ledger);
    ledger_master.check_accept(ledger.hash(), ledger.seq())
}

/// A configuration that never acquires history, so that tests see only the ledgers they ask for.
pub(crate) fn no_history() -> Configuration {
    Configuration::builder().ledger_history(0).build()
}
