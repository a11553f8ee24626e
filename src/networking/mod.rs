/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable peer-to-peer (P2P) networking.
//!
//! ledger_keeper does not open connections itself. Library users provide an implementation of
//! [`Network`](network::Network) that knows the connected peers, their advertised ledger ranges, and
//! their latencies, and that moves [`Message`](messages::Message)s to and from them.

pub mod network;

pub mod messages;

pub(crate) mod receiving;

pub(crate) mod sending;
