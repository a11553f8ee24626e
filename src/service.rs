/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to configure, build, and start a ledger service.
//!
//! A ledger service is a [`LedgerMaster`] together with the background threads that connect it to the
//! network:
//! 1. The poller, which takes fetch pack messages off the [`Network`] and routes them,
//! 2. The [`FetchPackServer`], which serves fetch pack requests and hands received fetch packs to the
//!    ledger master, and
//! 3. If any event handlers are registered, the [event bus](crate::event_bus).
//!
//! The ledger master's own background work (advance passes, backfills, path-finding) runs as jobs on the
//! [`JobScheduler`](crate::job_queue::JobScheduler) provided in the [`LedgerContext`].
//!
//! ## Starting a ledger service
//!
//! ```ignore
//! let service =
//!     LedgerServiceSpec::builder()
//!     .context(context)
//!     .network(network)
//!     .configuration(configuration)
//!     .on_publish_ledger(publish_handler)
//!     .build()
//!     .start();
//!
//! service.ledger_master().check_accept(hash, seq);
//! ```
//!
//! The [configuration](Configuration) is also built with the builder pattern. Every field has a
//! default, so only the fields that differ from the defaults need to be set:
//!
//! ```ignore
//! let configuration =
//!     Configuration::builder()
//!     .ledger_history(1024)
//!     .fetch_pack_max_objects(256)
//!     .log_events(true)
//!     .build();
//! ```

use std::{
    sync::{
        mpsc::{self, Sender},
        Arc,
    },
    thread::JoinHandle,
    time::Duration,
};

use typed_builder::TypedBuilder;

use crate::{
    event_bus::{start_event_bus, EventHandlers, HandlerPtr},
    events::*,
    fetch_pack::server::FetchPackServer,
    ledger_master::LedgerMaster,
    networking::{
        network::Network,
        receiving::{start_polling, FetchPackStub},
    },
    pluggables::LedgerContext,
};

/// Tunable parameters of the [`LedgerMaster`].
///
/// ## Gap and budgets
///
/// `max_ledger_gap`, `fetch_pack_max_objects`, and `fetch_pack_max_time` bound how much work a single
/// advance pass or fetch pack reply does. They trade latency against throughput and can be tuned
/// freely. Nothing else depends on their exact values.
///
/// ## Log Events
///
/// Events are logged through the [log](https://docs.rs/log/latest/log/) crate. To get them printed
/// onto a terminal or to a file, set up a logging implementation.
#[derive(Clone, Debug, TypedBuilder)]
pub struct Configuration {
    #[builder(default = false, setter(doc = "Run without a network: accept closed ledgers directly."))]
    pub standalone: bool,
    #[builder(default = 100, setter(doc = "Publish the valid ledger directly if it is more than this many ledgers ahead of the published ledger."))]
    pub max_ledger_gap: u32,
    #[builder(default = 4, setter(doc = "Maximum number of ledgers acquired per advance pass."))]
    pub ledger_fetch_size: usize,
    #[builder(default = 256, setter(doc = "Number of ledgers of history to acquire behind the valid ledger."))]
    pub ledger_history: u32,
    #[builder(default = 1_000_000_000, setter(doc = "Number of ledgers behind the closed ledger that fetch packs are served for."))]
    pub fetch_depth: u32,
    #[builder(default = 500, setter(doc = "Number of index entries read from the ledger store at a time while backfilling."))]
    pub hash_batch_size: u32,
    #[builder(default = 512, setter(doc = "Maximum number of objects in a fetch pack reply."))]
    pub fetch_pack_max_objects: usize,
    #[builder(default = Duration::from_secs(1), setter(doc = "Time allowed for building a fetch pack reply, counted from the request's arrival."))]
    pub fetch_pack_max_time: Duration,
    #[builder(default = Duration::from_secs(1), setter(doc = "Fetch pack requests older than the requester's latency plus this are dropped."))]
    pub fetch_pack_stale_after: Duration,
    #[builder(default = Duration::from_secs(40), setter(doc = "Refuse to serve fetch packs while the valid ledger is older than this."))]
    pub fetch_pack_max_validated_age: Duration,
    #[builder(default = 32600, setter(doc = "Fetch packs are only requested for ledgers above this sequence."))]
    pub fetch_pack_min_seq: u32,
    #[builder(default = 65536, setter(doc = "Target number of received fetch pack objects kept."))]
    pub fetch_pack_cache_size: usize,
    #[builder(default = Duration::from_secs(45), setter(doc = "Target age of received fetch pack objects kept."))]
    pub fetch_pack_cache_age: Duration,
    #[builder(default = Duration::from_secs(10), setter(doc = "How often the ledger and fetch pack caches are swept."))]
    pub sweep_interval: Duration,
    #[builder(default = Duration::from_secs(60), setter(doc = "Only acquire history while the valid ledger is younger than this."))]
    pub max_ledger_age_acquire: Duration,
    #[builder(default = 10, setter(doc = "Only acquire history while fewer backfill jobs than this are queued or running."))]
    pub max_old_ledger_jobs: usize,
    #[builder(default = 2, setter(doc = "Maximum number of path-finding jobs queued or running."))]
    pub max_path_find_jobs: usize,
    #[builder(default = Duration::from_secs(60), setter(doc = "Skip path-finding against ledgers older than this."))]
    pub max_path_find_age: Duration,
    #[builder(default = false, setter(doc = "Log every event."))]
    pub log_events: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration::builder().build()
    }
}

/// Stores all the parameters and trait implementations required to run a [`LedgerService`].
#[derive(TypedBuilder)]
pub struct LedgerServiceSpec<N: Network + 'static> {
    // Required parameters
    #[builder(setter(doc = "Set the collaborators of the ledger master. Required."))]
    context: LedgerContext,
    #[builder(setter(doc = "Set the implementation of peer-to-peer networking. Required."))]
    network: N,
    #[builder(default, setter(doc = "Set the configuration. Optional, defaults to `Configuration::default()`."))]
    configuration: Configuration,
    // Optional parameters
    #[builder(default, setter(transform = |handler: impl Fn(&AcceptLedgerEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<AcceptLedgerEvent>)))]
    on_accept_ledger: Option<HandlerPtr<AcceptLedgerEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ValidLedgerEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ValidLedgerEvent>)))]
    on_valid_ledger: Option<HandlerPtr<ValidLedgerEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PublishLedgerEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<PublishLedgerEvent>)))]
    on_publish_ledger: Option<HandlerPtr<PublishLedgerEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SkipGapEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SkipGapEvent>)))]
    on_skip_gap: Option<HandlerPtr<SkipGapEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&InvalidateLedgersEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<InvalidateLedgersEvent>)))]
    on_invalidate_ledgers: Option<HandlerPtr<InvalidateLedgersEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&BackfillEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<BackfillEvent>)))]
    on_backfill: Option<HandlerPtr<BackfillEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ConsensusBuiltEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ConsensusBuiltEvent>)))]
    on_consensus_built: Option<HandlerPtr<ConsensusBuiltEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&AcquireLedgerEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<AcquireLedgerEvent>)))]
    on_acquire_ledger: Option<HandlerPtr<AcquireLedgerEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RequestFetchPackEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RequestFetchPackEvent>)))]
    on_request_fetch_pack: Option<HandlerPtr<RequestFetchPackEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveFetchPackEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveFetchPackEvent>)))]
    on_receive_fetch_pack: Option<HandlerPtr<ReceiveFetchPackEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveFetchPackRequestEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveFetchPackRequestEvent>)))]
    on_receive_fetch_pack_request: Option<HandlerPtr<ReceiveFetchPackRequestEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SendFetchPackEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SendFetchPackEvent>)))]
    on_send_fetch_pack: Option<HandlerPtr<SendFetchPackEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RejectFetchPackEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RejectFetchPackEvent>)))]
    on_reject_fetch_pack: Option<HandlerPtr<RejectFetchPackEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&UpdateRemoteFeeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<UpdateRemoteFeeEvent>)))]
    on_update_remote_fee: Option<HandlerPtr<UpdateRemoteFeeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&AmendmentBlockedEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<AmendmentBlockedEvent>)))]
    on_amendment_blocked: Option<HandlerPtr<AmendmentBlockedEvent>>,
}

impl<N: Network + 'static> LedgerServiceSpec<N> {
    /// Starts the ledger master and its background threads, and returns the handles to them in a
    /// [`LedgerService`].
    pub fn start(mut self) -> LedgerService<N> {
        let event_handlers = self.event_handlers();

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let ledger_master = LedgerMaster::new(
            self.configuration,
            self.context,
            self.network.clone(),
            event_publisher.clone(),
        );

        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let (poller, requests, replies) = start_polling(self.network.clone(), poller_shutdown_receiver);

        let (fetch_pack_server_shutdown, fetch_pack_server_shutdown_receiver) = mpsc::channel();
        let fetch_pack_server = FetchPackServer::new(
            ledger_master.clone(),
            FetchPackStub::new(requests, replies),
            self.network,
            fetch_pack_server_shutdown_receiver,
            event_publisher,
        )
        .start();

        let (event_bus, event_bus_shutdown) = match event_subscriber {
            Some(event_subscriber) => {
                let (shutdown, shutdown_receiver) = mpsc::channel();
                let event_bus = start_event_bus(event_handlers, event_subscriber, shutdown_receiver);
                (Some(event_bus), Some(shutdown))
            }
            None => (None, None),
        };

        LedgerService {
            ledger_master,
            poller: Some(poller),
            poller_shutdown,
            fetch_pack_server: Some(fetch_pack_server),
            fetch_pack_server_shutdown,
            event_bus,
            event_bus_shutdown,
        }
    }

    /// The default loggers (if enabled) plus the handlers registered through the `on_*` setters.
    fn event_handlers(&mut self) -> EventHandlers {
        let mut event_handlers = EventHandlers::new(self.configuration.log_events);
        if let Some(handler) = self.on_accept_ledger.take() {
            event_handlers.accept_ledger_handlers.push(handler);
        }
        if let Some(handler) = self.on_valid_ledger.take() {
            event_handlers.valid_ledger_handlers.push(handler);
        }
        if let Some(handler) = self.on_publish_ledger.take() {
            event_handlers.publish_ledger_handlers.push(handler);
        }
        if let Some(handler) = self.on_skip_gap.take() {
            event_handlers.skip_gap_handlers.push(handler);
        }
        if let Some(handler) = self.on_invalidate_ledgers.take() {
            event_handlers.invalidate_ledgers_handlers.push(handler);
        }
        if let Some(handler) = self.on_backfill.take() {
            event_handlers.backfill_handlers.push(handler);
        }
        if let Some(handler) = self.on_consensus_built.take() {
            event_handlers.consensus_built_handlers.push(handler);
        }
        if let Some(handler) = self.on_acquire_ledger.take() {
            event_handlers.acquire_ledger_handlers.push(handler);
        }
        if let Some(handler) = self.on_request_fetch_pack.take() {
            event_handlers.request_fetch_pack_handlers.push(handler);
        }
        if let Some(handler) = self.on_receive_fetch_pack.take() {
            event_handlers.receive_fetch_pack_handlers.push(handler);
        }
        if let Some(handler) = self.on_receive_fetch_pack_request.take() {
            event_handlers.receive_fetch_pack_request_handlers.push(handler);
        }
        if let Some(handler) = self.on_send_fetch_pack.take() {
            event_handlers.send_fetch_pack_handlers.push(handler);
        }
        if let Some(handler) = self.on_reject_fetch_pack.take() {
            event_handlers.reject_fetch_pack_handlers.push(handler);
        }
        if let Some(handler) = self.on_update_remote_fee.take() {
            event_handlers.update_remote_fee_handlers.push(handler);
        }
        if let Some(handler) = self.on_amendment_blocked.take() {
            event_handlers.amendment_blocked_handlers.push(handler);
        }
        event_handlers
    }
}

/// A handle to a running ledger service. When this value is dropped, all background threads are
/// gracefully shut down.
pub struct LedgerService<N: Network> {
    ledger_master: Arc<LedgerMaster<N>>,
    poller: Option<JoinHandle<()>>,
    poller_shutdown: Sender<()>,
    fetch_pack_server: Option<JoinHandle<()>>,
    fetch_pack_server_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl<N: Network> LedgerService<N> {
    pub fn ledger_master(&self) -> &Arc<LedgerMaster<N>> {
        &self.ledger_master
    }
}

impl<N: Network> Drop for LedgerService<N> {
    fn drop(&mut self) {
        if let Some(shutdown) = &self.event_bus_shutdown {
            let _ = shutdown.send(());
        }
        if let Some(event_bus) = self.event_bus.take() {
            let _ = event_bus.join();
        }

        // The fetch pack server receives from the poller, so it must stop first.
        let _ = self.fetch_pack_server_shutdown.send(());
        if let Some(fetch_pack_server) = self.fetch_pack_server.take() {
            let _ = fetch_pack_server.join();
        }

        let _ = self.poller_shutdown.send(());
        if let Some(poller) = self.poller.take() {
            let _ = poller.join();
        }
    }
}
