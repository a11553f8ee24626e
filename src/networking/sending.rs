/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions and types for sending messages to the P2P network.

use ed25519_dalek::VerifyingKey;

use super::{
    messages::Message,
    network::{Charge, Network, PeerSummary},
};

/// Handle for sending messages to, and charging, peers on the [`Network`].
///
/// It can be used to send instances of any type that implement the [`Into<Message>`] trait.
#[derive(Clone)]
pub(crate) struct SenderHandle<N: Network> {
    network: N,
}

impl<N: Network> SenderHandle<N> {
    pub(crate) fn new(network: N) -> Self {
        Self { network }
    }

    pub(crate) fn send<S: Into<Message>>(&mut self, peer: VerifyingKey, msg: S) {
        self.network.send(peer, msg.into())
    }

    pub(crate) fn charge(&mut self, peer: VerifyingKey, charge: Charge) {
        self.network.charge(peer, charge)
    }

    pub(crate) fn active_peers(&self) -> Vec<PeerSummary> {
        self.network.active_peers()
    }
}
