/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Repairing the set of present ledgers after a newly accepted ledger shows that some of them belong to
//! a different chain.

use std::{sync::Arc, time::SystemTime};

use crate::{
    events::{Event, InvalidateLedgersEvent},
    networking::network::Network,
    types::{data_types::LedgerSeq, ledger::Ledger},
};

use super::LedgerMaster;

impl<N: Network> LedgerMaster<N> {
    /// Scan down from the parent of `ledger`, un-marking every present ledger that is not on `ledger`'s
    /// chain, until reaching the highest present ledger that is (the seam).
    ///
    /// A present ledger that fails its integrity check is un-marked and ends the scan. Returns the number
    /// of sequences un-marked.
    pub fn fix_mismatch(&self, ledger: &Arc<Ledger>) -> u32 {
        let mut invalidated = 0;
        let mut seam = None;

        let mut below = ledger.seq();
        loop {
            let present = self.lock_state().complete.prev_present(below);
            let candidate = match present {
                Some(candidate) if candidate.int() > 0 => candidate,
                _ => break,
            };
            below = candidate;

            let expected = match self.hash_of_seq_from(ledger, candidate) {
                Ok(expected) => expected,
                Err(err) => {
                    log::warn!("Mismatch scan stopped at {}: {}", candidate, err);
                    self.clear_ledger(candidate);
                    invalidated += 1;
                    break;
                }
            };

            if let Some(other) = self.ledger_by_seq(candidate) {
                if !other.is_intact() {
                    log::warn!("Ledger {} held locally is corrupt", candidate);
                    self.clear_ledger(candidate);
                    invalidated += 1;
                    break;
                }
                if expected == Some(other.hash()) {
                    seam = Some(candidate);
                    break;
                }
            }

            self.clear_ledger(candidate);
            invalidated += 1;
        }

        if invalidated > 0 {
            match seam {
                Some(seam) => log::warn!("{} prior ledgers invalidated, seam at {}", invalidated, seam),
                None => log::warn!("{} prior ledgers invalidated, no seam", invalidated),
            }
        }

        self.publish_event(Event::InvalidateLedgers(InvalidateLedgersEvent {
            timestamp: SystemTime::now(),
            from_seq: ledger.seq(),
            invalidated,
            seam,
        }));
        invalidated
    }
}
