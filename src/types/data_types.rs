/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that exist only to store bytes, and do not have any major "active" behavior.

use std::{
    fmt::{self, Debug, Display, Formatter},
    hash::Hash,
    ops::{Add, AddAssign, Sub, SubAssign},
    time::Duration,
};

use borsh::{BorshDeserialize, BorshSerialize};

/// Sequence number of a ledger in the ledger chain.
///
/// Starts at 0 for the genesis ledger and increases by exactly 1 along every parent-hash link. A
/// sequence of 0 is also used by callers of [`check_accept`](crate::ledger_master::LedgerMaster::check_accept)
/// to mean "sequence not known yet".
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct LedgerSeq(u32);

impl LedgerSeq {
    /// Create a new `LedgerSeq` with an `int` inner value.
    pub const fn new(int: u32) -> Self {
        Self(int)
    }

    /// Get the inner `u32` value of this `LedgerSeq`.
    pub const fn int(&self) -> u32 {
        self.0
    }

    /// Returns the sequence before this one, or `None` for sequence 0.
    pub fn prev(&self) -> Option<LedgerSeq> {
        self.0.checked_sub(1).map(LedgerSeq)
    }

    /// Subtract `rhs`, stopping at 0.
    pub fn saturating_sub(&self, rhs: u32) -> LedgerSeq {
        LedgerSeq(self.0.saturating_sub(rhs))
    }
}

impl Display for LedgerSeq {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl AddAssign<u32> for LedgerSeq {
    fn add_assign(&mut self, rhs: u32) {
        self.0.add_assign(rhs)
    }
}

impl Add<u32> for LedgerSeq {
    type Output = LedgerSeq;
    fn add(self, rhs: u32) -> Self::Output {
        LedgerSeq::new(self.0.add(rhs))
    }
}

impl SubAssign<u32> for LedgerSeq {
    fn sub_assign(&mut self, rhs: u32) {
        self.0.sub_assign(rhs)
    }
}

impl Sub<u32> for LedgerSeq {
    type Output = LedgerSeq;
    fn sub(self, rhs: u32) -> Self::Output {
        LedgerSeq::new(self.0 - rhs)
    }
}

impl Sub<LedgerSeq> for LedgerSeq {
    type Output = u32;
    fn sub(self, rhs: LedgerSeq) -> Self::Output {
        self.0 - rhs.0
    }
}

/// Network time: whole seconds since the network's epoch.
///
/// Close times and validation signing times are expressed in `NetTime`. A value of 0 means "unknown".
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct NetTime(u64);

impl NetTime {
    /// Create a new `NetTime` from a number of seconds since the network epoch.
    pub const fn new(secs: u64) -> Self {
        Self(secs)
    }

    /// Get the number of seconds since the network epoch.
    pub const fn secs(&self) -> u64 {
        self.0
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Time elapsed from `earlier` to `self`, or zero if `earlier` is later than `self`.
    pub fn duration_since(&self, earlier: NetTime) -> Duration {
        Duration::from_secs(self.0.saturating_sub(earlier.0))
    }
}

impl Display for NetTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl Add<Duration> for NetTime {
    type Output = NetTime;
    fn add(self, rhs: Duration) -> Self::Output {
        NetTime(self.0 + rhs.as_secs())
    }
}

/// Amount of a fee, in the network's smallest fee unit.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct Fee(u64);

impl Fee {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for Fee {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

/// 32-byte cryptographic hash.
///
/// Ledger identity hashes are always SHA256 hashes of a ledger's [prefixed header
/// serialization](super::ledger::LedgerHeader::serialize_prefixed). Tree hashes carried inside a header
/// may come from any 32-byte hash function chosen by the state and transaction tree implementations.
///
/// The all-zeroes hash is reserved to mean "no hash", e.g., the transaction tree hash of a ledger without
/// transactions.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    /// Create a new `CryptoHash` wrapping `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The reserved all-zeroes hash.
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    /// Get the inner `[u8; 32]` value of this `CryptoHash`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl Display for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
