/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The fetch pack protocol, which lets a node that is missing a run of historical ledgers get their
//! headers and tree nodes from a peer in bulk, instead of acquiring them one node at a time.
//!
//! ## Protocol
//!
//! 1. The requester knows the hash of ledger `n + 1` but is missing ledger `n`. It picks a peer that
//!    advertises both ledgers ([`client::select_peer`]) and sends it a
//!    [`FetchPackRequest`](messages::FetchPackRequest) naming ledger `n + 1` as `have`.
//! 2. The responder ([`server`]) walks back from `have`, adding for each ledger its header, the state
//!    tree nodes that differ from the ledger after it, and its transaction tree nodes. It stops at a
//!    fixed object budget or a fixed time budget, and replies with the objects collected so far.
//! 3. The requester stores every object in its [fetch pack cache](cache::FetchPackCache) under the hash
//!    the responder claimed for it, and tells pending acquisitions that new data has arrived.
//! 4. Acquisitions take objects out of the cache one at a time. The cache recomputes each object's
//!    hash before handing it out, and drops objects whose hash does not match.
//!
//! The responder refuses, and may charge the requester for, requests it cannot or will not serve. Its
//! rules are documented on [`FetchPackError`](server::FetchPackError).

pub mod cache;

pub mod client;

pub mod messages;

pub mod server;
