/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Tracking, publishing, and backfilling the validated ledger chain of a BFT ledger network.
//!
//! A node in a ledger network sees ledgers arrive from local consensus, from peers, and from its own
//! store. This crate's [`LedgerMaster`](ledger_master::LedgerMaster) decides which of them is the
//! irreversibly valid ledger, publishes validated ledgers to subscribers in strict sequence order, and
//! keeps local history complete by acquiring, backfilling, and repairing it.
//!
//! The ledger master does not validate transactions, verify signatures, or talk to the network on its
//! own. It relies on [pluggable collaborators](pluggables) for all of these, bundled in a
//! [`LedgerContext`](pluggables::LedgerContext), and on a [`Network`](networking::network::Network)
//! implementation for the [fetch pack](fetch_pack) protocol that lets peers send each other compact runs
//! of history.
//!
//! Use a [`LedgerServiceSpec`](service::LedgerServiceSpec) to start a ledger master together with the
//! threads that serve it.

pub mod types;

pub mod range_tracker;

pub mod tagged_cache;

pub mod ledger_history;

pub mod pluggables;

pub mod job_queue;

pub mod events;

pub(crate) mod event_bus;

pub mod logging;

pub mod networking;

pub mod fetch_pack;

pub mod ledger_master;

pub mod service;
