/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Set of ledger sequence numbers whose ledgers are known to be fully present and verified locally.
//!
//! The set is stored as disjoint closed intervals keyed by their lower bound. Intervals are always
//! coalesced: no two stored intervals overlap or touch, so `[1,5]` and `[6,9]` are stored as `[1,9]`.
//!
//! The [`LedgerMaster`](crate::ledger_master::LedgerMaster) only ever adds sequences it has verified
//! (through [`set_value`](RangeTracker::set_value) and [`set_range`](RangeTracker::set_range)), and
//! removes them one at a time through [`clear_value`](RangeTracker::clear_value) when repair finds that
//! a claimed ledger is on the wrong chain.

use std::{
    collections::BTreeMap,
    fmt::{self, Display, Formatter},
};

use crate::types::data_types::LedgerSeq;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RangeTracker {
    // Lower bound -> upper bound, both inclusive.
    ranges: BTreeMap<u32, u32>,
}

impl RangeTracker {
    pub fn new() -> RangeTracker {
        Self::default()
    }

    pub fn set_value(&mut self, seq: LedgerSeq) {
        self.set_range(seq, seq)
    }

    /// Add every sequence in `[min, max]`. The bounds may be given in either order.
    pub fn set_range(&mut self, min: LedgerSeq, max: LedgerSeq) {
        let (mut low, mut high) = if min <= max {
            (min.int(), max.int())
        } else {
            (max.int(), min.int())
        };

        let touching: Vec<u32> = self
            .ranges
            .range(..=high.saturating_add(1))
            .rev()
            .take_while(|interval| interval.1.saturating_add(1) >= low)
            .map(|(&start, _)| start)
            .collect();

        for start in touching {
            if let Some(end) = self.ranges.remove(&start) {
                low = low.min(start);
                high = high.max(end);
            }
        }

        self.ranges.insert(low, high);
    }

    /// Remove `seq`, splitting the interval that contained it if needed.
    pub fn clear_value(&mut self, seq: LedgerSeq) {
        let seq = seq.int();
        let Some((&start, &end)) = self.ranges.range(..=seq).next_back() else {
            return;
        };
        if end < seq {
            return;
        }

        self.ranges.remove(&start);
        if start < seq {
            self.ranges.insert(start, seq - 1);
        }
        if seq < end {
            self.ranges.insert(seq + 1, end);
        }
    }

    pub fn contains(&self, seq: LedgerSeq) -> bool {
        self.containing(seq.int()).is_some()
    }

    /// Whether every sequence in `[min, max]` is present.
    pub fn contains_range(&self, min: LedgerSeq, max: LedgerSeq) -> bool {
        if min > max {
            return true;
        }
        match self.containing(min.int()) {
            Some((_, end)) => end >= max.int(),
            None => false,
        }
    }

    /// The largest sequence strictly below `seq` that is not present, if any.
    pub fn prev_missing(&self, seq: LedgerSeq) -> Option<LedgerSeq> {
        let candidate = seq.int().checked_sub(1)?;
        match self.containing(candidate) {
            // Intervals are coalesced, so the value just below an interval is always missing.
            Some((start, _)) => start.checked_sub(1).map(LedgerSeq::new),
            None => Some(LedgerSeq::new(candidate)),
        }
    }

    /// The largest sequence strictly below `seq` that is present, if any.
    pub fn prev_present(&self, seq: LedgerSeq) -> Option<LedgerSeq> {
        let below = seq.int().checked_sub(1)?;
        let (_, &end) = self.ranges.range(..=below).next_back()?;
        Some(LedgerSeq::new(end.min(below)))
    }

    pub fn first(&self) -> Option<LedgerSeq> {
        self.ranges.keys().next().map(|&start| LedgerSeq::new(start))
    }

    pub fn last(&self) -> Option<LedgerSeq> {
        self.ranges.values().next_back().map(|&end| LedgerSeq::new(end))
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Remove every sequence below `seq`.
    pub fn clear_prior(&mut self, seq: LedgerSeq) {
        let seq = seq.int();
        let below: Vec<(u32, u32)> = self
            .ranges
            .range(..seq)
            .map(|(&start, &end)| (start, end))
            .collect();
        for (start, end) in below {
            self.ranges.remove(&start);
            if end >= seq {
                self.ranges.insert(seq, end);
            }
        }
    }

    /// Iterate through the stored intervals in ascending order.
    pub fn intervals(&self) -> impl Iterator<Item = (LedgerSeq, LedgerSeq)> + '_ {
        self.ranges
            .iter()
            .map(|(&start, &end)| (LedgerSeq::new(start), LedgerSeq::new(end)))
    }

    fn containing(&self, seq: u32) -> Option<(u32, u32)> {
        let (&start, &end) = self.ranges.range(..=seq).next_back()?;
        (end >= seq).then_some((start, end))
    }
}

/// Formats as comma-separated intervals, e.g., `1-5,7,9-10`, or `empty`.
impl Display for RangeTracker {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.ranges.is_empty() {
            return write!(f, "empty");
        }
        let mut first = true;
        for (&start, &end) in &self.ranges {
            if !first {
                write!(f, ",")?;
            }
            first = false;
            if start == end {
                write!(f, "{}", start)?;
            } else {
                write!(f, "{}-{}", start, end)?;
            }
        }
        Ok(())
    }
}
