//! Grow-only and positive/negative counters
//!
//! Tallies are kept per writer and only grow: P collects raises, N
//! collects lowerings, and merge takes the per-writer max in each tally.
//! A writer moves the counter by adjusting its own buckets, so its net
//! tally (P minus N) always equals the last value it asserted; the counter
//! reads as the greatest net tally across writers. Concurrent writers who
//! assert different values therefore converge on the greatest one,
//! whichever order the merges run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Grow-only counter: per-node tallies that only increase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GCounter {
    counts: BTreeMap<String, u64>,
}

impl GCounter {
    pub fn new() -> Self {
        Self {
            counts: BTreeMap::new(),
        }
    }

    pub fn increment_by(&mut self, node_id: &str, amount: u64) {
        *self.counts.entry(node_id.to_string()).or_insert(0) += amount;
    }

    pub fn value(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn node_count(&self, node_id: &str) -> u64 {
        self.counts.get(node_id).copied().unwrap_or(0)
    }

    /// Per-node max merge.
    pub fn merge(&mut self, other: &Self) {
        for (node_id, &count) in &other.counts {
            let entry = self.counts.entry(node_id.clone()).or_insert(0);
            *entry = (*entry).max(count);
        }
    }
}

/// Positive/negative counter over two grow-only per-writer tallies.
///
/// Each writer's buckets are written only by that writer, so the per-node
/// max merge always keeps a writer's latest assertion. The value is the
/// greatest asserted net tally; it may go negative.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PnCounter {
    p: GCounter,
    n: GCounter,
}

impl PnCounter {
    pub fn new() -> Self {
        Self {
            p: GCounter::new(),
            n: GCounter::new(),
        }
    }

    pub fn increment_by(&mut self, node_id: &str, amount: u64) {
        self.p.increment_by(node_id, amount);
    }

    pub fn decrement_by(&mut self, node_id: &str, amount: u64) {
        self.n.increment_by(node_id, amount);
    }

    /// One writer's net tally: its last asserted value.
    fn net(&self, node_id: &str) -> i64 {
        self.p.node_count(node_id) as i64 - self.n.node_count(node_id) as i64
    }

    /// The greatest net tally across writers (0 when untouched).
    pub fn value(&self) -> i64 {
        let mut greatest: Option<i64> = None;
        for node_id in self.p.counts.keys().chain(self.n.counts.keys()) {
            let net = self.net(node_id);
            greatest = Some(greatest.map_or(net, |g| g.max(net)));
        }
        greatest.unwrap_or(0)
    }

    /// Move this writer's assertion to `target` by applying the signed
    /// delta from its own net tally as an increment or decrement.
    ///
    /// This is the only write path: callers hand over target values, never
    /// raw tally assignments, and each writer only ever touches its own
    /// buckets.
    pub fn set_value(&mut self, node_id: &str, target: i64) {
        let delta = target - self.net(node_id);
        if delta > 0 {
            self.increment_by(node_id, delta as u64);
        } else if delta < 0 {
            self.decrement_by(node_id, (-delta) as u64);
        }
    }

    pub fn merge(&mut self, other: &Self) {
        self.p.merge(&other.p);
        self.n.merge(&other.n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gcounter_sums_nodes() {
        let mut counter = GCounter::new();
        counter.increment_by("a", 2);
        counter.increment_by("b", 1);
        assert_eq!(counter.value(), 3);
        assert_eq!(counter.node_count("a"), 2);
        assert_eq!(counter.node_count("missing"), 0);
    }

    #[test]
    fn test_gcounter_merge_takes_max() {
        let mut a = GCounter::new();
        a.increment_by("a", 2);
        let mut b = GCounter::new();
        b.increment_by("a", 1);
        b.increment_by("b", 1);
        a.merge(&b);
        assert_eq!(a.node_count("a"), 2);
        assert_eq!(a.value(), 3);
    }

    #[test]
    fn test_pn_value_can_go_negative() {
        let mut counter = PnCounter::new();
        counter.decrement_by("a", 2);
        assert_eq!(counter.value(), -2);
    }

    #[test]
    fn test_set_value_applies_delta() {
        let mut counter = PnCounter::new();
        counter.set_value("a", 5);
        assert_eq!(counter.value(), 5);
        counter.set_value("a", 3);
        assert_eq!(counter.value(), 3);
        counter.set_value("a", 3);
        assert_eq!(counter.value(), 3);
    }

    #[test]
    fn test_concurrent_targets_resolve_to_greatest() {
        // Two writers assert different targets concurrently; after the
        // reciprocal merge both replicas report the greater one.
        let mut x = PnCounter::new();
        let mut y = PnCounter::new();
        x.set_value("x", 5);
        y.set_value("y", 4);

        x.merge(&y);
        y.merge(&x);
        assert_eq!(x.value(), 5);
        assert_eq!(x, y);
    }

    #[test]
    fn test_writer_keeps_its_own_assertion_history() {
        let mut counter = PnCounter::new();
        counter.set_value("a", 5);
        counter.set_value("a", 2);
        assert_eq!(counter.value(), 2);

        // a replica that saw only the first assertion converges on merge
        let mut stale = PnCounter::new();
        stale.set_value("a", 5);
        stale.merge(&counter);
        assert_eq!(stale.value(), 2);
    }

    #[test]
    fn test_merge_laws() {
        let mut a = PnCounter::new();
        a.increment_by("a", 3);
        a.decrement_by("b", 1);
        let mut b = PnCounter::new();
        b.increment_by("b", 2);
        let mut c = PnCounter::new();
        c.decrement_by("c", 4);

        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);
        assert_eq!(ab, ba);

        let mut ab_c = ab.clone();
        ab_c.merge(&c);
        let mut bc = b.clone();
        bc.merge(&c);
        let mut a_bc = a.clone();
        a_bc.merge(&bc);
        assert_eq!(ab_c, a_bc);

        let mut aa = a.clone();
        aa.merge(&a);
        assert_eq!(aa, a);
    }

    #[test]
    fn test_tallies_only_grow_under_merge() {
        let mut a = PnCounter::new();
        a.increment_by("a", 5);
        let snapshot = a.clone();

        let mut b = PnCounter::new();
        b.increment_by("a", 2);
        a.merge(&b);

        assert_eq!(a, snapshot);
    }
}
