/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use std::time::Duration;

use ed25519_dalek::VerifyingKey;

use crate::types::data_types::LedgerSeq;

use super::messages::Message;

pub trait Network: Clone + Send + 'static {
    /// Summaries of the peers currently connected.
    fn active_peers(&self) -> Vec<PeerSummary>;

    /// Send a message to the specified peer without blocking.
    fn send(&mut self, peer: VerifyingKey, message: Message);

    /// Penalize the specified peer for a request it should not have made.
    fn charge(&mut self, peer: VerifyingKey, charge: Charge);

    /// Receive a message from any peer. Returns immediately with a None if no message is available now.
    fn recv(&mut self) -> Option<(VerifyingKey, Message)>;
}

/// What this node knows about a connected peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerSummary {
    pub peer: VerifyingKey,
    /// The range of validated ledgers the peer advertises, both bounds inclusive.
    pub ledger_range: Option<(LedgerSeq, LedgerSeq)>,
    /// Measured round-trip latency, if known.
    pub latency: Option<Duration>,
}

impl PeerSummary {
    /// Whether the peer advertises every ledger in `[min, max]`.
    pub fn has_range(&self, min: LedgerSeq, max: LedgerSeq) -> bool {
        match self.ledger_range {
            Some((low, high)) => low <= min && max <= high,
            None => false,
        }
    }
}

/// Penalties charged against peers that send requests this node will not serve.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Charge {
    /// The request names something this node does not have; it costs a lookup but gets no reply.
    RequestNoReply,
    /// The request could never be served by any correct node.
    InvalidRequest,
}
