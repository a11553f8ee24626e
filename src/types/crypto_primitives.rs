/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cryptographic primitives.
//!
//! The definitions and re-exports in this module provide two categories of cryptographic primitives:
//! 1. **Cryptographic Hashes**: provided by the [`sha2`] crate. Ledger identity hashes and fetch pack
//!    object hashes are SHA256.
//! 2. **Peer identities**: [`VerifyingKey`]s from the [`ed25519_dalek`] crate identify peers and the
//!    signers of validations. Signature verification itself happens outside this crate.

use super::data_types::CryptoHash;

// re-exports below.
pub use sha2::Digest;
pub use sha2::Sha256 as CryptoHasher;

pub use ed25519_dalek::{SigningKey, VerifyingKey};

/// Compute the SHA256 hash of `bytes`.
pub fn sha256(bytes: &[u8]) -> CryptoHash {
    let mut hasher = CryptoHasher::new();
    hasher.update(bytes);
    CryptoHash::new(hasher.finalize().into())
}
