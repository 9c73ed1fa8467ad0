//! Site identity and the replica's logical clock.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a replica session. Universe-unique with overwhelming
/// probability: generated from 128 bits of randomness on replica init
/// and discarded on shutdown (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SiteId(u128);

impl SiteId {
    /// Generates a fresh, effectively-unique site id.
    pub fn generate() -> Self {
        Self(rand::thread_rng().gen())
    }

    /// Wraps a raw value. Mainly useful for deterministic tests.
    pub fn from_raw(raw: u128) -> Self {
        Self(raw)
    }

    pub fn as_u128(&self) -> u128 {
        self.0
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// A monotonic Lamport clock, advanced on every local operation and on
/// receipt of any remote operation (invariant I4). The replica's event
/// loop is single-threaded (spec §5), so a plain counter is sufficient;
/// no atomics are needed here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct LamportClock(u64);

impl LamportClock {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    /// Advances the clock for a local operation and returns the new value.
    pub fn tick(&mut self) -> u64 {
        self.0 += 1;
        self.0
    }

    /// Advances the clock on observing a remote timestamp: I4 requires
    /// `lamport >= timestamp` of any operation ever observed.
    pub fn observe(&mut self, remote_timestamp: u64) {
        self.0 = self.0.max(remote_timestamp) + 1;
    }

    /// Merges in a clock value read from a snapshot, never going backwards.
    pub fn merge(&mut self, other: u64) {
        self.0 = self.0.max(other);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_ids_are_distinct() {
        let a = SiteId::generate();
        let b = SiteId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn clock_ticks_monotonically() {
        let mut clock = LamportClock::new();
        let t1 = clock.tick();
        let t2 = clock.tick();
        assert!(t2 > t1);
    }

    #[test]
    fn clock_observe_advances_past_remote() {
        let mut clock = LamportClock::new();
        clock.observe(100);
        assert!(clock.get() > 100);
        clock.tick();
        assert!(clock.get() > 100);
    }

    #[test]
    fn clock_observe_never_goes_backwards() {
        let mut clock = LamportClock::new();
        clock.tick();
        clock.tick();
        clock.tick();
        let before = clock.get();
        clock.observe(1);
        assert!(clock.get() >= before);
    }
}
