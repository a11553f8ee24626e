//! Builders for chains of ledgers.

use std::sync::Arc;

use ledger_keeper::types::{
    crypto_primitives::sha256,
    data_types::{CryptoHash, NetTime},
    ledger::Ledger,
};

pub(crate) const GENESIS_CLOSE_TIME: u64 = 1_000_000;

pub(crate) const CLOSE_INTERVAL: u64 = 4;

pub(crate) fn close_time_of(seq: u32) -> NetTime {
    NetTime::new(GENESIS_CLOSE_TIME + seq as u64 * CLOSE_INTERVAL)
}

/// A chain of ledgers from genesis up to and including `tip`. The ledger at index `i` has sequence `i`.
pub(crate) fn build_chain(tip: u32) -> Vec<Arc<Ledger>> {
    let mut chain = Vec::with_capacity(tip as usize + 1);
    chain.push(Arc::new(Ledger::genesis(
        sha256(b"genesis state"),
        close_time_of(0),
    )));
    for seq in 1..=tip {
        let child = Ledger::child_of(
            &chain[seq as usize - 1],
            tx_hash("main", seq),
            state_hash("main", seq),
            close_time_of(seq),
        );
        chain.push(Arc::new(child));
    }
    chain
}

/// `len` ledgers that follow `parent` but differ from any ledger built by [`build_chain`].
pub(crate) fn fork_from(parent: &Arc<Ledger>, len: u32) -> Vec<Arc<Ledger>> {
    let mut fork: Vec<Arc<Ledger>> = Vec::with_capacity(len as usize);
    for _ in 0..len {
        let prev = fork.last().unwrap_or(parent).clone();
        let seq = prev.seq().int() + 1;
        let child = Ledger::child_of(
            &prev,
            tx_hash("fork", seq),
            state_hash("fork", seq),
            close_time_of(seq),
        );
        fork.push(Arc::new(child));
    }
    fork
}

fn tx_hash(branch: &str, seq: u32) -> CryptoHash {
    sha256(format!("{} txs {}", branch, seq).as_bytes())
}

fn state_hash(branch: &str, seq: u32) -> CryptoHash {
    sha256(format!("{} state {}", branch, seq).as_bytes())
}
