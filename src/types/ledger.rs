/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the [`Ledger`] type and its [header](LedgerHeader).
//!
//! ## Header serialization
//!
//! A ledger's identity hash is the SHA256 hash of its *prefixed header serialization*: the four bytes
//! of [`LEDGER_HEADER_PREFIX`] followed by the Borsh encoding of the header's fields in this order:
//! 1. `seq`,
//! 2. `parent_hash`,
//! 3. `tx_hash`,
//! 4. `state_hash`,
//! 5. `parent_close_time`,
//! 6. `close_time`.
//!
//! The same bytes are what a fetch pack carries as a ledger's header object, so a receiver can check a
//! header object against its claimed hash without knowing anything else about the ledger.
//!
//! ## Skip list
//!
//! Every ledger carries the hashes of up to [`SKIP_LIST_LENGTH`] of its most recent ancestors, oldest
//! first and its parent last. This lets [`hash_of_seq`](Ledger::hash_of_seq) resolve recent ancestors
//! without loading them. Resolving older ancestors requires hopping to the
//! [oldest listed ancestor](Ledger::oldest_ancestor) and continuing from there.

use std::{
    fmt::{self, Display, Formatter},
    sync::atomic::{AtomicBool, Ordering},
};

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    crypto_primitives::sha256,
    data_types::{CryptoHash, LedgerSeq, NetTime},
};

/// Bytes that open every prefixed header serialization.
pub const LEDGER_HEADER_PREFIX: [u8; 4] = *b"LWR\0";

/// Maximum number of ancestor hashes carried by a ledger.
pub const SKIP_LIST_LENGTH: usize = 256;

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct LedgerHeader {
    pub seq: LedgerSeq,
    pub parent_hash: CryptoHash,
    pub tx_hash: CryptoHash,
    pub state_hash: CryptoHash,
    pub parent_close_time: NetTime,
    pub close_time: NetTime,
}

impl LedgerHeader {
    /// Serialize the header behind [`LEDGER_HEADER_PREFIX`].
    pub fn serialize_prefixed(&self) -> Vec<u8> {
        let mut bytes = LEDGER_HEADER_PREFIX.to_vec();
        bytes.extend(self.try_to_vec().unwrap());
        bytes
    }

    /// Parse bytes produced by [`serialize_prefixed`](Self::serialize_prefixed).
    ///
    /// The prefix is checked before anything else is read.
    pub fn deserialize_prefixed(bytes: &[u8]) -> Result<LedgerHeader, HeaderDecodeError> {
        if bytes.len() < LEDGER_HEADER_PREFIX.len() {
            return Err(HeaderDecodeError::Truncated);
        }
        let (prefix, mut body) = bytes.split_at(LEDGER_HEADER_PREFIX.len());
        if prefix != LEDGER_HEADER_PREFIX {
            return Err(HeaderDecodeError::WrongPrefix);
        }
        LedgerHeader::deserialize(&mut body).map_err(HeaderDecodeError::Borsh)
    }

    /// The SHA256 hash of the prefixed serialization of this header.
    pub fn hash(&self) -> CryptoHash {
        sha256(&self.serialize_prefixed())
    }
}

#[derive(Debug)]
pub enum HeaderDecodeError {
    WrongPrefix,
    Truncated,
    Borsh(std::io::Error),
}

impl Display for HeaderDecodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            HeaderDecodeError::WrongPrefix => write!(f, "header bytes do not start with the ledger prefix"),
            HeaderDecodeError::Truncated => write!(f, "header bytes are shorter than the prefix"),
            HeaderDecodeError::Borsh(err) => write!(f, "header bytes failed to deserialize: {}", err),
        }
    }
}

/// An immutable ledger, shared between components as an `Arc<Ledger>`.
///
/// The only mutable parts of a `Ledger` are its `validated` and `full` flags, which can each be set
/// exactly once and never cleared.
#[derive(Debug)]
pub struct Ledger {
    header: LedgerHeader,
    hash: CryptoHash,
    skip_list: Vec<CryptoHash>,
    open: bool,
    validated: AtomicBool,
    full: AtomicBool,
}

impl Ledger {
    /// Create a closed ledger from its `header` and ancestor `skip_list`, computing its hash.
    pub fn new(header: LedgerHeader, skip_list: Vec<CryptoHash>) -> Ledger {
        let hash = header.hash();
        Ledger::from_parts(header, hash, skip_list, false)
    }

    /// Create the genesis ledger.
    pub fn genesis(state_hash: CryptoHash, close_time: NetTime) -> Ledger {
        Ledger::new(
            LedgerHeader {
                seq: LedgerSeq::new(0),
                parent_hash: CryptoHash::zero(),
                tx_hash: CryptoHash::zero(),
                state_hash,
                parent_close_time: NetTime::new(0),
                close_time,
            },
            Vec::new(),
        )
    }

    /// Create the closed ledger that directly follows `parent`.
    pub fn child_of(
        parent: &Ledger,
        tx_hash: CryptoHash,
        state_hash: CryptoHash,
        close_time: NetTime,
    ) -> Ledger {
        Ledger::new(
            LedgerHeader {
                seq: parent.seq() + 1,
                parent_hash: parent.hash,
                tx_hash,
                state_hash,
                parent_close_time: parent.close_time(),
                close_time,
            },
            parent.skip_list_for_child(),
        )
    }

    /// Create an open (still being built) ledger on top of `parent`. Open ledgers are never served to
    /// peers.
    pub fn open_child_of(parent: &Ledger) -> Ledger {
        let header = LedgerHeader {
            seq: parent.seq() + 1,
            parent_hash: parent.hash,
            tx_hash: CryptoHash::zero(),
            state_hash: parent.state_hash(),
            parent_close_time: parent.close_time(),
            close_time: NetTime::new(0),
        };
        let hash = header.hash();
        Ledger::from_parts(header, hash, parent.skip_list_for_child(), true)
    }

    /// Rebuild a ledger from persisted parts without recomputing its hash.
    ///
    /// Use [`is_intact`](Self::is_intact) to check that `hash` really belongs to `header`.
    pub fn from_stored(header: LedgerHeader, hash: CryptoHash, skip_list: Vec<CryptoHash>) -> Ledger {
        Ledger::from_parts(header, hash, skip_list, false)
    }

    fn from_parts(
        header: LedgerHeader,
        hash: CryptoHash,
        mut skip_list: Vec<CryptoHash>,
        open: bool,
    ) -> Ledger {
        if skip_list.len() > SKIP_LIST_LENGTH {
            skip_list.drain(..skip_list.len() - SKIP_LIST_LENGTH);
        }
        Ledger {
            header,
            hash,
            skip_list,
            open,
            validated: AtomicBool::new(false),
            full: AtomicBool::new(false),
        }
    }

    fn skip_list_for_child(&self) -> Vec<CryptoHash> {
        let mut skip_list = self.skip_list.clone();
        skip_list.push(self.hash);
        if skip_list.len() > SKIP_LIST_LENGTH {
            skip_list.remove(0);
        }
        skip_list
    }

    pub fn header(&self) -> &LedgerHeader {
        &self.header
    }

    pub fn hash(&self) -> CryptoHash {
        self.hash
    }

    pub fn seq(&self) -> LedgerSeq {
        self.header.seq
    }

    pub fn parent_hash(&self) -> CryptoHash {
        self.header.parent_hash
    }

    pub fn tx_hash(&self) -> CryptoHash {
        self.header.tx_hash
    }

    pub fn state_hash(&self) -> CryptoHash {
        self.header.state_hash
    }

    pub fn close_time(&self) -> NetTime {
        self.header.close_time
    }

    pub fn parent_close_time(&self) -> NetTime {
        self.header.parent_close_time
    }

    pub fn skip_list(&self) -> &[CryptoHash] {
        &self.skip_list
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn is_validated(&self) -> bool {
        self.validated.load(Ordering::Acquire)
    }

    /// Mark this ledger validated. Returns whether the flag changed.
    pub fn set_validated(&self) -> bool {
        !self.validated.swap(true, Ordering::AcqRel)
    }

    /// Whether all of this ledger's tree nodes are known to be stored locally.
    pub fn is_full(&self) -> bool {
        self.full.load(Ordering::Acquire)
    }

    /// Mark this ledger full. Returns whether the flag changed.
    pub fn set_full(&self) -> bool {
        !self.full.swap(true, Ordering::AcqRel)
    }

    /// Whether this ledger's hash is the hash of its header.
    pub fn is_intact(&self) -> bool {
        self.open || self.header.hash() == self.hash
    }

    /// Hash of the ancestor (or self) at `seq`, if this ledger's skip list reaches that far back.
    pub fn hash_of_seq(&self, seq: LedgerSeq) -> Option<CryptoHash> {
        let own_seq = self.seq();
        if seq == own_seq {
            return Some(self.hash);
        }
        if seq > own_seq {
            return None;
        }
        let distance = (own_seq - seq) as usize;
        if distance > self.skip_list.len() {
            return None;
        }
        self.skip_list.get(self.skip_list.len() - distance).copied()
    }

    /// The sequence number and hash of the oldest ancestor listed in this ledger's skip list.
    pub fn oldest_ancestor(&self) -> Option<(LedgerSeq, CryptoHash)> {
        let oldest = self.skip_list.first()?;
        Some((self.seq() - self.skip_list.len() as u32, *oldest))
    }
}
