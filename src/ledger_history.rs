/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [`LedgerHistory`], the default [`LedgerCache`].
//!
//! Ledgers are kept in a size- and age-bounded [`TaggedCache`] keyed by hash. Validated ledgers are also
//! indexed by sequence. The index outlives cache eviction: a sequence whose ledger has been evicted
//! still resolves to a hash through [`ledger_hash`](LedgerCache::ledger_hash), but no longer to a ledger
//! through [`by_seq`](LedgerCache::by_seq).
//!
//! `LedgerHistory` also compares the ledger local consensus built at each sequence with the ledger that
//! was eventually validated there, and counts the sequences where they differ.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use crate::{
    pluggables::{ConsensusInfo, LedgerCache},
    tagged_cache::{CacheStats, TaggedCache},
    types::{
        data_types::{CryptoHash, LedgerSeq},
        ledger::Ledger,
    },
};

/// Number of sequences for which built and validated ledgers are remembered.
const CONSENSUS_RECORD_LIMIT: usize = 128;

#[derive(Default)]
struct ConsensusRecord {
    built: Option<(CryptoHash, ConsensusInfo)>,
    validated: Option<CryptoHash>,
}

#[derive(Default)]
struct Index {
    by_seq: BTreeMap<LedgerSeq, CryptoHash>,
    consensus: BTreeMap<LedgerSeq, ConsensusRecord>,
    mismatches: usize,
}

pub struct LedgerHistory {
    ledgers: TaggedCache<CryptoHash, Arc<Ledger>>,
    index: Mutex<Index>,
}

impl LedgerHistory {
    pub fn new(target_size: usize, target_age: Duration) -> LedgerHistory {
        LedgerHistory {
            ledgers: TaggedCache::new("LedgerCache", target_size, target_age),
            index: Mutex::new(Index::default()),
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.ledgers.stats()
    }

    /// Number of sequences where the ledger built by local consensus was not the ledger validated.
    pub fn mismatches(&self) -> usize {
        self.lock_index().mismatches
    }

    fn lock_index(&self) -> MutexGuard<'_, Index> {
        self.index
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Index {
    fn record(&mut self, seq: LedgerSeq) -> &mut ConsensusRecord {
        while self.consensus.len() >= CONSENSUS_RECORD_LIMIT && !self.consensus.contains_key(&seq) {
            self.consensus.pop_first();
        }
        self.consensus.entry(seq).or_default()
    }

    fn check_mismatch(&mut self, seq: LedgerSeq) {
        let Some(record) = self.consensus.get(&seq) else {
            return;
        };
        if let (Some((built, info)), Some(validated)) = (&record.built, &record.validated) {
            if built != validated {
                log::warn!(
                    "Built ledger {} at {} does not match validated ledger {} ({} proposers, {} ms, close time agreed: {})",
                    built,
                    seq,
                    validated,
                    info.proposers,
                    info.round_time_ms,
                    info.close_time_agreed
                );
                self.mismatches += 1;
            }
        }
    }
}

impl LedgerCache for LedgerHistory {
    fn by_hash(&self, hash: &CryptoHash) -> Option<Arc<Ledger>> {
        self.ledgers.fetch(hash)
    }

    fn by_seq(&self, seq: LedgerSeq) -> Option<Arc<Ledger>> {
        let hash = self.lock_index().by_seq.get(&seq).copied()?;
        self.ledgers
            .fetch(&hash)
            .filter(|ledger| ledger.seq() == seq)
    }

    fn insert(&self, ledger: Arc<Ledger>, validated: bool) -> bool {
        let hash = ledger.hash();
        let seq = ledger.seq();
        let already_cached = self.ledgers.insert(hash, ledger);
        if validated {
            self.lock_index().by_seq.insert(seq, hash);
        }
        already_cached
    }

    fn ledger_hash(&self, seq: LedgerSeq) -> Option<CryptoHash> {
        self.lock_index().by_seq.get(&seq).copied()
    }

    fn validated_ledger(&self, ledger: &Arc<Ledger>) {
        let seq = ledger.seq();
        let mut index = self.lock_index();
        index.by_seq.insert(seq, ledger.hash());
        index.record(seq).validated = Some(ledger.hash());
        index.check_mismatch(seq);
    }

    fn built_ledger(&self, ledger: &Arc<Ledger>, info: ConsensusInfo) {
        self.ledgers.canonicalize(ledger.hash(), ledger.clone());
        let seq = ledger.seq();
        let mut index = self.lock_index();
        index.record(seq).built = Some((ledger.hash(), info));
        index.check_mismatch(seq);
    }

    fn sweep(&self) {
        let evicted = self.ledgers.sweep();
        if evicted > 0 {
            log::debug!("{}: evicted {} ledgers", self.ledgers.name(), evicted);
        }
    }

    fn clear_prior(&self, seq: LedgerSeq) {
        let mut index = self.lock_index();
        index.by_seq = index.by_seq.split_off(&seq);
    }
}
