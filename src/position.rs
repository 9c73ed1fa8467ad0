//! The position identifier algebra (C1): a total order over
//! variable-length integer vectors, with a deterministic
//! "allocate strictly between" operation.
//!
//! The base is fixed at `2^20` per spec §4.1/§9: any power of two `>= 2`
//! would be correct in isolation, but the value must be identical across
//! every replica in a deployment since ids minted on one replica are
//! compared on another. Changing it is a wire-incompatible revision.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// `2^20`. Fixed for the deployment; see module docs.
pub const BASE: u64 = 1 << 20;

/// A non-empty sequence of integer components, compared lexicographically:
/// the first differing component decides, and a strict prefix is less
/// than its extension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PosId(Vec<u64>);

impl Ord for PosId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for PosId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PosId {
    pub fn components(&self) -> &[u64] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Mainly for tests and wire (de)serialization round-trips.
    pub fn from_components(components: Vec<u64>) -> Self {
        assert!(!components.is_empty(), "PosId must be non-empty");
        Self(components)
    }

    /// Allocates a fresh id `p` such that `lo < p < hi`, where `lo = None`
    /// means "lower than any existing id" and `hi = None` means "higher
    /// than any existing id" (spec §4.1).
    pub fn allocate_between(lo: Option<&PosId>, hi: Option<&PosId>) -> PosId {
        // hi = None is special-cased per spec §4.1's edge case: rather than
        // treating the absent upper bound as "2*BASE" and halving into it
        // (which would eat into the headroom geometrically), we extend
        // lo's own last component by BASE. This always leaves room for
        // more appends after the document's current tail without ever
        // needing to grow the id's depth.
        if let (Some(lo), None) = (lo, hi) {
            let mut components = lo.0.clone();
            let last = components.len() - 1;
            components[last] += BASE;
            return PosId(components);
        }

        let mut prefix = Vec::new();
        let mut depth = 0usize;

        loop {
            let lo_d = lo.and_then(|p| p.0.get(depth).copied()).unwrap_or(0);
            let hi_d = hi.and_then(|p| p.0.get(depth).copied()).unwrap_or(2 * BASE);

            if hi_d.saturating_sub(lo_d) >= 2 {
                prefix.push(lo_d + (hi_d - lo_d) / 2);
                return PosId(prefix);
            }

            // Interval too narrow at this depth: keep the prefix digit,
            // descend one level, and retry with the padded bounds.
            prefix.push(lo_d);
            depth += 1;
        }
    }
}
