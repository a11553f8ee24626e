/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the service's
//! [configuration](crate::service::Configuration).
//!
//! ledger_keeper logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [PublishLedger](crate::events::PublishLedgerEvent) is printed:
//!
//! ```text
//! PublishLedger, 1701329264, fNGCJyk, 8812
//! ```
//!
//! In the snippet:
//! - The third value is the first seven characters of the Base64 encoding of the hash of the published
//!   ledger.
//! - The fourth value is the sequence number of the published ledger.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use log;
use std::time::SystemTime;

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const ACCEPT_LEDGER: &str = "AcceptLedger";
pub const VALID_LEDGER: &str = "ValidLedger";
pub const PUBLISH_LEDGER: &str = "PublishLedger";
pub const SKIP_GAP: &str = "SkipGap";
pub const INVALIDATE_LEDGERS: &str = "InvalidateLedgers";
pub const BACKFILL: &str = "Backfill";
pub const CONSENSUS_BUILT: &str = "ConsensusBuilt";

pub const ACQUIRE_LEDGER: &str = "AcquireLedger";
pub const REQUEST_FETCH_PACK: &str = "RequestFetchPack";
pub const RECEIVE_FETCH_PACK: &str = "ReceiveFetchPack";

pub const RECEIVE_FETCH_PACK_REQUEST: &str = "ReceiveFetchPackRequest";
pub const SEND_FETCH_PACK: &str = "SendFetchPack";
pub const REJECT_FETCH_PACK: &str = "RejectFetchPack";

pub const UPDATE_REMOTE_FEE: &str = "UpdateRemoteFee";
pub const AMENDMENT_BLOCKED: &str = "AmendmentBlocked";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for AcceptLedgerEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |accept_ledger_event: &AcceptLedgerEvent| {
            log::info!(
                "{}, {}, {}, {}",
                ACCEPT_LEDGER,
                secs_since_unix_epoch(accept_ledger_event.timestamp),
                first_seven_base64_chars(&accept_ledger_event.ledger.bytes()),
                accept_ledger_event.seq
            )
        };
        Box::new(logger)
    }
}

impl Logger for ValidLedgerEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |valid_ledger_event: &ValidLedgerEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                VALID_LEDGER,
                secs_since_unix_epoch(valid_ledger_event.timestamp),
                first_seven_base64_chars(&valid_ledger_event.ledger.bytes()),
                valid_ledger_event.seq,
                valid_ledger_event.sign_time
            )
        };
        Box::new(logger)
    }
}

impl Logger for PublishLedgerEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |publish_ledger_event: &PublishLedgerEvent| {
            log::info!(
                "{}, {}, {}, {}",
                PUBLISH_LEDGER,
                secs_since_unix_epoch(publish_ledger_event.timestamp),
                first_seven_base64_chars(&publish_ledger_event.ledger.bytes()),
                publish_ledger_event.seq
            )
        };
        Box::new(logger)
    }
}

impl Logger for SkipGapEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |skip_gap_event: &SkipGapEvent| {
            log::info!(
                "{}, {}, {}, {}",
                SKIP_GAP,
                secs_since_unix_epoch(skip_gap_event.timestamp),
                skip_gap_event.published_seq,
                skip_gap_event.valid_seq
            )
        };
        Box::new(logger)
    }
}

impl Logger for InvalidateLedgersEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |invalidate_ledgers_event: &InvalidateLedgersEvent| {
            let seam = match invalidate_ledgers_event.seam {
                Some(seq) => seq.to_string(),
                None => String::from("none"),
            };
            log::info!(
                "{}, {}, {}, {}, {}",
                INVALIDATE_LEDGERS,
                secs_since_unix_epoch(invalidate_ledgers_event.timestamp),
                invalidate_ledgers_event.from_seq,
                invalidate_ledgers_event.invalidated,
                seam
            )
        };
        Box::new(logger)
    }
}

impl Logger for BackfillEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |backfill_event: &BackfillEvent| {
            log::info!(
                "{}, {}, {}, {}",
                BACKFILL,
                secs_since_unix_epoch(backfill_event.timestamp),
                backfill_event.min_seq,
                backfill_event.max_seq
            )
        };
        Box::new(logger)
    }
}

impl Logger for ConsensusBuiltEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |consensus_built_event: &ConsensusBuiltEvent| {
            log::info!(
                "{}, {}, {}, {}",
                CONSENSUS_BUILT,
                secs_since_unix_epoch(consensus_built_event.timestamp),
                first_seven_base64_chars(&consensus_built_event.ledger.bytes()),
                consensus_built_event.seq
            )
        };
        Box::new(logger)
    }
}

impl Logger for AcquireLedgerEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |acquire_ledger_event: &AcquireLedgerEvent| {
            log::info!(
                "{}, {}, {}, {}, {:?}",
                ACQUIRE_LEDGER,
                secs_since_unix_epoch(acquire_ledger_event.timestamp),
                first_seven_base64_chars(&acquire_ledger_event.ledger.bytes()),
                acquire_ledger_event.seq,
                acquire_ledger_event.reason
            )
        };
        Box::new(logger)
    }
}

impl Logger for RequestFetchPackEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |request_fetch_pack_event: &RequestFetchPackEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                REQUEST_FETCH_PACK,
                secs_since_unix_epoch(request_fetch_pack_event.timestamp),
                first_seven_base64_chars(&request_fetch_pack_event.peer.to_bytes()),
                first_seven_base64_chars(&request_fetch_pack_event.have.bytes()),
                request_fetch_pack_event.missing_seq
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveFetchPackEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_fetch_pack_event: &ReceiveFetchPackEvent| {
            log::info!(
                "{}, {}, {}, {}",
                RECEIVE_FETCH_PACK,
                secs_since_unix_epoch(receive_fetch_pack_event.timestamp),
                first_seven_base64_chars(&receive_fetch_pack_event.peer.to_bytes()),
                receive_fetch_pack_event.objects
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveFetchPackRequestEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_request_event: &ReceiveFetchPackRequestEvent| {
            log::info!(
                "{}, {}, {}, {}",
                RECEIVE_FETCH_PACK_REQUEST,
                secs_since_unix_epoch(receive_request_event.timestamp),
                first_seven_base64_chars(&receive_request_event.peer.to_bytes()),
                first_seven_base64_chars(&receive_request_event.have.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for SendFetchPackEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |send_fetch_pack_event: &SendFetchPackEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                SEND_FETCH_PACK,
                secs_since_unix_epoch(send_fetch_pack_event.timestamp),
                first_seven_base64_chars(&send_fetch_pack_event.peer.to_bytes()),
                first_seven_base64_chars(&send_fetch_pack_event.have.bytes()),
                send_fetch_pack_event.objects
            )
        };
        Box::new(logger)
    }
}

impl Logger for RejectFetchPackEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |reject_fetch_pack_event: &RejectFetchPackEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                REJECT_FETCH_PACK,
                secs_since_unix_epoch(reject_fetch_pack_event.timestamp),
                first_seven_base64_chars(&reject_fetch_pack_event.peer.to_bytes()),
                first_seven_base64_chars(&reject_fetch_pack_event.have.bytes()),
                reject_fetch_pack_event.reason
            )
        };
        Box::new(logger)
    }
}

impl Logger for UpdateRemoteFeeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |update_remote_fee_event: &UpdateRemoteFeeEvent| {
            log::info!(
                "{}, {}, {}",
                UPDATE_REMOTE_FEE,
                secs_since_unix_epoch(update_remote_fee_event.timestamp),
                update_remote_fee_event.fee
            )
        };
        Box::new(logger)
    }
}

impl Logger for AmendmentBlockedEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |amendment_blocked_event: &AmendmentBlockedEvent| {
            log::error!(
                "{}, {}, {}, {}",
                AMENDMENT_BLOCKED,
                secs_since_unix_epoch(amendment_blocked_event.timestamp),
                first_seven_base64_chars(&amendment_blocked_event.ledger.bytes()),
                amendment_blocked_event.seq
            )
        };
        Box::new(logger)
    }
}

fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}
