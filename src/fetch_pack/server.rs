/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The responding side of the fetch pack protocol, and the [FetchPackServer] thread that runs it.
//!
//! The server thread does two things on every iteration:
//! 1. Serves at most one received [`FetchPackRequest`], replying with a pack built by
//!    [`LedgerMaster::make_fetch_pack`] or charging the requester if the request is refused.
//! 2. Hands every received [`FetchPackReply`](super::messages::FetchPackReply) to the ledger master,
//!    charging peers whose replies are oversized.
//!
//! It also [sweeps](LedgerMaster::sweep) the ledger master's caches every `sweep_interval`.

use std::{
    fmt::{self, Display, Formatter},
    sync::{
        mpsc::{Receiver, Sender, TryRecvError},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant, SystemTime},
};

use ed25519_dalek::VerifyingKey;

use crate::{
    events::{Event, ReceiveFetchPackRequestEvent, RejectFetchPackEvent, SendFetchPackEvent},
    ledger_master::LedgerMaster,
    networking::{
        network::{Charge, Network},
        receiving::{FetchPackReceiveError, FetchPackStub},
        sending::SenderHandle,
    },
};

use super::messages::{FetchPackReply, FetchPackRequest, IndexedObject};

/// Reasons a fetch pack request is not served.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchPackError {
    /// The request waited longer than the requester's round-trip latency plus the staleness allowance.
    /// The requester has most likely given up on it.
    Stale,
    /// This node is under load, or is itself out of sync with the network.
    TooBusy,
    /// This node does not have the `have` ledger.
    UnknownHave,
    /// The `have` ledger is still open.
    HaveIsOpen,
    /// The `have` ledger is older than the history this node serves.
    TooEarly,
    /// This node does not have the `have` ledger's parent.
    UnknownParent,
}

impl FetchPackError {
    /// The charge levied on the requester, if any.
    pub fn charge(&self) -> Option<Charge> {
        match self {
            FetchPackError::Stale | FetchPackError::TooBusy => None,
            FetchPackError::UnknownHave | FetchPackError::UnknownParent => Some(Charge::RequestNoReply),
            FetchPackError::HaveIsOpen | FetchPackError::TooEarly => Some(Charge::InvalidRequest),
        }
    }
}

impl Display for FetchPackError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let reason = match self {
            FetchPackError::Stale => "stale",
            FetchPackError::TooBusy => "too busy",
            FetchPackError::UnknownHave => "unknown have ledger",
            FetchPackError::HaveIsOpen => "have ledger is open",
            FetchPackError::TooEarly => "have ledger is too early",
            FetchPackError::UnknownParent => "unknown parent ledger",
        };
        write!(f, "{}", reason)
    }
}

impl<N: Network> LedgerMaster<N> {
    /// Build the reply to `request`, received at `received_at` from a peer with round-trip latency
    /// `peer_latency`.
    ///
    /// The reply starts at the parent of the `have` ledger and walks back one ledger at a time. For each
    /// ledger it carries the ledger's header, the state tree nodes not shared with the ledger after it,
    /// and, if the ledger has transactions, its transaction tree nodes. The walk stops once the reply
    /// holds the configured maximum number of objects, once the configured build time has passed since
    /// `received_at`, or when a parent is not available locally. Replies never hold more than the maximum
    /// number of objects.
    pub fn make_fetch_pack(
        &self,
        request: &FetchPackRequest,
        received_at: Instant,
        peer_latency: Duration,
    ) -> Result<FetchPackReply, FetchPackError> {
        let config = self.configuration();

        if received_at.elapsed() > peer_latency + config.fetch_pack_stale_after {
            log::info!("Fetch pack request got stale");
            return Err(FetchPackError::Stale);
        }

        if self.context().fee_track.is_loaded_local()
            || self.validated_ledger_age() > config.fetch_pack_max_validated_age
        {
            log::info!("Too busy to make fetch pack");
            return Err(FetchPackError::TooBusy);
        }

        let mut have_ledger = self
            .ledger_by_hash(&request.have)
            .ok_or(FetchPackError::UnknownHave)?;
        if have_ledger.is_open() {
            log::warn!("Peer requests fetch pack from open ledger: {}", have_ledger.seq());
            return Err(FetchPackError::HaveIsOpen);
        }
        if have_ledger.seq() < self.earliest_fetch() {
            log::debug!("Peer requests fetch pack that is too early");
            return Err(FetchPackError::TooEarly);
        }
        let mut want_ledger = self
            .ledger_by_hash(&have_ledger.parent_hash())
            .ok_or(FetchPackError::UnknownParent)?;

        let tree_nodes = &self.context().tree_nodes;
        let max_objects = config.fetch_pack_max_objects;
        let deadline = received_at + config.fetch_pack_max_time;
        let mut objects: Vec<IndexedObject> = Vec::new();

        loop {
            let seq = want_ledger.seq();
            objects.push(IndexedObject {
                ledger_seq: seq,
                hash: want_ledger.hash(),
                data: want_ledger.header().serialize_prefixed(),
            });

            let room = max_objects.saturating_sub(objects.len());
            objects.extend(
                tree_nodes
                    .state_delta(&want_ledger, &have_ledger, room)
                    .into_iter()
                    .take(room)
                    .map(|(hash, data)| IndexedObject { ledger_seq: seq, hash, data }),
            );

            if !want_ledger.tx_hash().is_zero() {
                let room = max_objects.saturating_sub(objects.len());
                objects.extend(
                    tree_nodes
                        .tx_nodes(&want_ledger, room)
                        .into_iter()
                        .take(room)
                        .map(|(hash, data)| IndexedObject { ledger_seq: seq, hash, data }),
                );
            }

            if objects.len() >= max_objects {
                break;
            }

            let Some(parent) = self.ledger_by_hash(&want_ledger.parent_hash()) else {
                break;
            };
            have_ledger = want_ledger;
            want_ledger = parent;

            if Instant::now() > deadline {
                break;
            }
        }

        objects.truncate(max_objects);
        log::info!("Built fetch pack with {} nodes", objects.len());

        Ok(FetchPackReply {
            have: request.have,
            seq: request.seq,
            objects,
        })
    }
}

pub struct FetchPackServer<N: Network> {
    ledger_master: Arc<LedgerMaster<N>>,
    receiver: FetchPackStub,
    sender: SenderHandle<N>,
    shutdown_signal: Receiver<()>,
    event_publisher: Option<Sender<Event>>,
    last_sweep: Instant,
}

impl<N: Network> FetchPackServer<N> {
    pub(crate) fn new(
        ledger_master: Arc<LedgerMaster<N>>,
        receiver: FetchPackStub,
        network: N,
        shutdown_signal: Receiver<()>,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            ledger_master,
            receiver,
            sender: SenderHandle::new(network),
            shutdown_signal,
            event_publisher,
            last_sweep: Instant::now(),
        }
    }

    pub(crate) fn start(mut self) -> JoinHandle<()> {
        thread::spawn(move || loop {
            match self.shutdown_signal.try_recv() {
                Ok(()) => return,
                Err(TryRecvError::Empty) => (),
                Err(TryRecvError::Disconnected) => return,
            }

            // 1. Serve a received fetch pack request.
            match self.receiver.recv_request() {
                Ok((origin, request, received_at)) => {
                    self.serve(origin, request, received_at)
                }
                Err(FetchPackReceiveError::NotAvailable) => (),
                Err(FetchPackReceiveError::Disconnected) => return,
            }

            // 2. Hand received fetch packs to the ledger master.
            while let Ok((origin, reply)) = self.receiver.recv_reply() {
                if let Err(reason) = self.ledger_master.got_fetch_pack_reply(origin, reply) {
                    if let Some(charge) = reason.charge() {
                        self.sender.charge(origin, charge);
                    }
                }
            }

            // 3. Sweep the caches.
            if self.last_sweep.elapsed() >= self.ledger_master.configuration().sweep_interval {
                self.ledger_master.sweep();
                self.last_sweep = Instant::now();
            }

            thread::yield_now();
        })
    }

    fn serve(
        &mut self,
        origin: VerifyingKey,
        request: FetchPackRequest,
        received_at: Instant,
    ) {
        Event::ReceiveFetchPackRequest(ReceiveFetchPackRequestEvent {
            timestamp: SystemTime::now(),
            peer: origin,
            have: request.have,
        })
        .publish(&self.event_publisher);

        let peer_latency = self
            .sender
            .active_peers()
            .into_iter()
            .find(|peer| peer.peer == origin)
            .and_then(|peer| peer.latency)
            .unwrap_or_default();

        match self
            .ledger_master
            .make_fetch_pack(&request, received_at, peer_latency)
        {
            Ok(reply) => {
                let objects = reply.objects.len();
                self.sender.send(origin, reply);

                Event::SendFetchPack(SendFetchPackEvent {
                    timestamp: SystemTime::now(),
                    peer: origin,
                    have: request.have,
                    objects,
                })
                .publish(&self.event_publisher);
            }
            Err(reason) => {
                if let Some(charge) = reason.charge() {
                    self.sender.charge(origin, charge);
                }

                Event::RejectFetchPack(RejectFetchPackEvent {
                    timestamp: SystemTime::now(),
                    peer: origin,
                    have: request.have,
                    reason,
                })
                .publish(&self.event_publisher);
            }
        }
    }
}
