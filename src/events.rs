/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Events that the ledger master and its protocol threads emit.
//!
//! An event for a given action indicates that the action has been completed. Events are delivered to the
//! [event bus](crate::event_bus) thread, which passes them to the handlers registered through the
//! [service builder](crate::service::LedgerServiceSpec), and to the default [loggers](crate::logging) if
//! logging is enabled.

use std::sync::mpsc::Sender;
use std::time::SystemTime;

use ed25519_dalek::VerifyingKey;

use crate::fetch_pack::server::FetchPackError;
use crate::pluggables::AcquireReason;
use crate::types::data_types::{CryptoHash, Fee, LedgerSeq, NetTime};

pub enum Event {
    // Events that change which ledgers are valid, published, or present.
    AcceptLedger(AcceptLedgerEvent),
    ValidLedger(ValidLedgerEvent),
    PublishLedger(PublishLedgerEvent),
    SkipGap(SkipGapEvent),
    InvalidateLedgers(InvalidateLedgersEvent),
    Backfill(BackfillEvent),
    ConsensusBuilt(ConsensusBuiltEvent),
    // Events that involve acquiring ledgers from peers.
    AcquireLedger(AcquireLedgerEvent),
    RequestFetchPack(RequestFetchPackEvent),
    ReceiveFetchPack(ReceiveFetchPackEvent),
    // Events that involve serving fetch packs to peers.
    ReceiveFetchPackRequest(ReceiveFetchPackRequestEvent),
    SendFetchPack(SendFetchPackEvent),
    RejectFetchPack(RejectFetchPackEvent),
    // Events that report on the node's standing in the network.
    UpdateRemoteFee(UpdateRemoteFeeEvent),
    AmendmentBlocked(AmendmentBlockedEvent),
}

impl Event {
    pub(crate) fn publish(self, event_publisher: &Option<Sender<Event>>) {
        if let Some(event_publisher) = event_publisher {
            // The event bus may already be shut down.
            let _ = event_publisher.send(self);
        }
    }
}

/// A ledger was marked validated and full and recorded as present.
pub struct AcceptLedgerEvent {
    pub timestamp: SystemTime,
    pub ledger: CryptoHash,
    pub seq: LedgerSeq,
}

/// The valid ledger advanced.
pub struct ValidLedgerEvent {
    pub timestamp: SystemTime,
    pub ledger: CryptoHash,
    pub seq: LedgerSeq,
    pub sign_time: NetTime,
}

/// A ledger was delivered to subscribers.
pub struct PublishLedgerEvent {
    pub timestamp: SystemTime,
    pub ledger: CryptoHash,
    pub seq: LedgerSeq,
}

/// The published ledger jumped forward to the valid ledger because the gap between them was too large
/// to publish ledger by ledger.
pub struct SkipGapEvent {
    pub timestamp: SystemTime,
    pub published_seq: LedgerSeq,
    pub valid_seq: LedgerSeq,
}

/// Repair removed `invalidated` sequences, scanning down from `from_seq`. `seam` is the highest sequence
/// that was found to agree with the new chain, if the scan found one.
pub struct InvalidateLedgersEvent {
    pub timestamp: SystemTime,
    pub from_seq: LedgerSeq,
    pub invalidated: u32,
    pub seam: Option<LedgerSeq>,
}

/// A backfill walk marked `[min_seq, max_seq]` present.
pub struct BackfillEvent {
    pub timestamp: SystemTime,
    pub min_seq: LedgerSeq,
    pub max_seq: LedgerSeq,
}

pub struct ConsensusBuiltEvent {
    pub timestamp: SystemTime,
    pub ledger: CryptoHash,
    pub seq: LedgerSeq,
}

pub struct AcquireLedgerEvent {
    pub timestamp: SystemTime,
    pub ledger: CryptoHash,
    pub seq: LedgerSeq,
    pub reason: AcquireReason,
}

/// A fetch pack was requested from `peer`, naming the ledger `have` whose ancestors are wanted.
pub struct RequestFetchPackEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKey,
    pub have: CryptoHash,
    pub missing_seq: LedgerSeq,
}

pub struct ReceiveFetchPackEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKey,
    pub objects: usize,
}

pub struct ReceiveFetchPackRequestEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKey,
    pub have: CryptoHash,
}

pub struct SendFetchPackEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKey,
    pub have: CryptoHash,
    pub objects: usize,
}

pub struct RejectFetchPackEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKey,
    pub have: CryptoHash,
    pub reason: FetchPackError,
}

pub struct UpdateRemoteFeeEvent {
    pub timestamp: SystemTime,
    pub fee: Fee,
}

/// The network enabled an amendment this node does not support. The node stays blocked until restarted
/// with a version that supports it.
pub struct AmendmentBlockedEvent {
    pub timestamp: SystemTime,
    pub ledger: CryptoHash,
    pub seq: LedgerSeq,
}
