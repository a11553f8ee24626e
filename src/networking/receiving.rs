/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions and types for receiving messages from the P2P network.

use std::{
    sync::mpsc::{self, Receiver, TryRecvError},
    thread::{self, JoinHandle},
    time::Instant,
};

use ed25519_dalek::VerifyingKey;

use crate::fetch_pack::messages::{FetchPackMessage, FetchPackReply, FetchPackRequest};

use super::{messages::Message, network::Network};

/// A fetch pack request, stamped with the time the poller took it off the network.
pub(crate) type ReceivedRequest = (VerifyingKey, FetchPackRequest, Instant);

/// Spawn the poller thread, which polls the [`Network`] for messages and distributes them into receiver
/// handles.
///
/// The kinds of messages that the poller polls are:
/// 1. Fetch pack requests (served by the [`FetchPackServer`](crate::fetch_pack::server::FetchPackServer)),
///    and
/// 2. Fetch pack replies (handed to the [`LedgerMaster`](crate::ledger_master::LedgerMaster) by the same
///    thread).
pub(crate) fn start_polling<N: Network>(
    mut network: N,
    shutdown_signal: Receiver<()>,
) -> (
    JoinHandle<()>,
    Receiver<ReceivedRequest>,
    Receiver<(VerifyingKey, FetchPackReply)>,
) {
    let (to_request_receiver, request_receiver) = mpsc::channel();
    let (to_reply_receiver, reply_receiver) = mpsc::channel();

    let poller_thread = thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => return,
        }

        if let Some((origin, msg)) = network.recv() {
            match msg {
                Message::FetchPackMessage(FetchPackMessage::Request(request)) => {
                    let _ = to_request_receiver.send((origin, request, Instant::now()));
                }
                Message::FetchPackMessage(FetchPackMessage::Reply(reply)) => {
                    let _ = to_reply_receiver.send((origin, reply));
                }
            }
        } else {
            thread::yield_now()
        }
    });

    (poller_thread, request_receiver, reply_receiver)
}

/// A receiving end for fetch pack requests and replies.
pub(crate) struct FetchPackStub {
    requests: Receiver<ReceivedRequest>,
    replies: Receiver<(VerifyingKey, FetchPackReply)>,
}

impl FetchPackStub {
    pub(crate) fn new(
        requests: Receiver<ReceivedRequest>,
        replies: Receiver<(VerifyingKey, FetchPackReply)>,
    ) -> FetchPackStub {
        FetchPackStub { requests, replies }
    }

    /// Receive a [FetchPackRequest] if available, else return [FetchPackReceiveError::NotAvailable].
    pub(crate) fn recv_request(&self) -> Result<ReceivedRequest, FetchPackReceiveError> {
        match self.requests.try_recv() {
            Ok(request) => Ok(request),
            Err(TryRecvError::Disconnected) => Err(FetchPackReceiveError::Disconnected),
            Err(TryRecvError::Empty) => Err(FetchPackReceiveError::NotAvailable),
        }
    }

    /// Receive a [FetchPackReply] if available, else return [FetchPackReceiveError::NotAvailable].
    pub(crate) fn recv_reply(
        &self,
    ) -> Result<(VerifyingKey, FetchPackReply), FetchPackReceiveError> {
        match self.replies.try_recv() {
            Ok(reply) => Ok(reply),
            Err(TryRecvError::Disconnected) => Err(FetchPackReceiveError::Disconnected),
            Err(TryRecvError::Empty) => Err(FetchPackReceiveError::NotAvailable),
        }
    }
}

#[derive(Debug)]
pub enum FetchPackReceiveError {
    Disconnected,
    NotAvailable,
}
