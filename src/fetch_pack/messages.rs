/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for structured messages that are sent between peers as part of the fetch pack protocol.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::data_types::{CryptoHash, LedgerSeq};

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum FetchPackMessage {
    Request(FetchPackRequest),
    Reply(FetchPackReply),
}

/// Asks a peer for the ancestors of `have`.
///
/// `have` is the hash of the ledger directly after the one the requester is missing, so the responder
/// starts the pack from `have`'s parent. `seq` is the sequence of the missing ledger, if known.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct FetchPackRequest {
    pub have: CryptoHash,
    pub seq: Option<LedgerSeq>,
}

/// Ledger headers and tree nodes for one or more consecutive ancestors of the requested `have` ledger.
///
/// Echoes the `have` and `seq` of the request it answers.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct FetchPackReply {
    pub have: CryptoHash,
    pub seq: Option<LedgerSeq>,
    pub objects: Vec<IndexedObject>,
}

/// A content-addressed blob: `hash` is the claimed SHA256 hash of `data`.
///
/// Receivers must not trust `hash` until they have recomputed it.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct IndexedObject {
    pub ledger_seq: LedgerSeq,
    pub hash: CryptoHash,
    pub data: Vec<u8>,
}
