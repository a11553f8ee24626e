/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cache of objects received in fetch packs, waiting to be consumed by ledger acquisitions.

use std::{sync::Arc, time::Duration};

use crate::{
    tagged_cache::TaggedCache,
    types::{crypto_primitives::sha256, data_types::CryptoHash},
};

/// Objects received in fetch packs, keyed by the hash their sender claimed for them.
///
/// Every object can be taken out at most once, and is only handed out if its data hashes to its key.
pub struct FetchPackCache {
    objects: TaggedCache<CryptoHash, Arc<Vec<u8>>>,
}

impl FetchPackCache {
    pub fn new(target_size: usize, target_age: Duration) -> FetchPackCache {
        FetchPackCache {
            objects: TaggedCache::new("FetchPack", target_size, target_age),
        }
    }

    /// Store `data` under its claimed `hash`. Objects whose data does not hash to `hash` are dropped.
    ///
    /// Returns whether the object was kept.
    pub fn add(&self, hash: CryptoHash, data: Vec<u8>) -> bool {
        if sha256(&data) != hash {
            log::debug!("Dropping fetch pack object with wrong hash {}", hash);
            return false;
        }
        self.objects.canonicalize(hash, Arc::new(data));
        true
    }

    /// Remove the object stored under `hash` and return it if its data really hashes to `hash`.
    pub fn take(&self, hash: &CryptoHash) -> Option<Vec<u8>> {
        let data = self.objects.remove(hash)?;
        if sha256(&data) != *hash {
            log::warn!("Bad entry in fetch pack cache");
            return None;
        }
        Some(Arc::try_unwrap(data).unwrap_or_else(|shared| (*shared).clone()))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn sweep(&self) -> usize {
        self.objects.sweep()
    }
}
