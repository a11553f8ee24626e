/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Validations: statements by validators that a given ledger is the correct ledger at its sequence.

use ed25519_dalek::VerifyingKey;

use super::data_types::{CryptoHash, Fee, LedgerSeq, NetTime};

/// A single validation, as reported by the [`ValidationTracker`](crate::pluggables::ValidationTracker).
///
/// Signatures have already been checked by the time a `ValidationRecord` reaches this crate. `seq` may
/// be unknown if the validator did not include it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationRecord {
    pub signer: VerifyingKey,
    pub ledger_hash: CryptoHash,
    pub seq: Option<LedgerSeq>,
    pub trusted: bool,
    pub sign_time: NetTime,
    pub fee: Option<Fee>,
}
