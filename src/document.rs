//! Replica state (C2): the live character sequence, the tombstone set,
//! and the Lamport clock, plus the local/remote edit operations that
//! mutate them while preserving invariants I1-I6.

use crate::character::Character;
use crate::error::{DocumentError, InvalidIndexSnafu};
use crate::id::{LamportClock, SiteId};
use crate::operation::Operation;
use crate::position::PosId;
use serde::{Deserialize, Serialize};
use snafu::ensure;
use std::collections::HashSet;

/// A durable snapshot of replica state, for local persistence (spec §4.2
/// `snapshot()`/`restore()`, §6 `state-<docId>`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub live: Vec<Character>,
    pub tombstones: Vec<PosId>,
    pub lamport: u64,
}

/// One participant's in-process copy of the document.
///
/// `live` is kept in ascending `Character` order (I1) as a flat,
/// binary-searched vector — acceptable per §9's design notes up to
/// roughly 10^4 characters; larger documents would want an
/// order-statistics tree instead, which this module does not implement.
#[derive(Debug)]
pub struct Replica {
    site: SiteId,
    lamport: LamportClock,
    live: Vec<Character>,
    tombstones: HashSet<PosId>,
}

impl Replica {
    pub fn new(site: SiteId) -> Self {
        Self {
            site,
            lamport: LamportClock::new(),
            live: Vec::new(),
            tombstones: HashSet::new(),
        }
    }

    pub fn site_id(&self) -> SiteId {
        self.site
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// The concatenation of live characters' values in `PosId` order (I5).
    pub fn text(&self) -> String {
        self.live.iter().map(|c| c.value).collect()
    }

    /// Local insert at `index` (0-indexed, `0..=len()`). Allocates a new
    /// `PosId` strictly between the neighbors on either side of `index`
    /// and advances the clock.
    pub fn local_insert(&mut self, index: usize, value: char) -> Result<Operation, DocumentError> {
        ensure!(
            index <= self.live.len(),
            InvalidIndexSnafu {
                index,
                len: self.live.len(),
            }
        );

        let lo = if index == 0 {
            None
        } else {
            Some(self.live[index - 1].id.clone())
        };
        let hi = if index == self.live.len() {
            None
        } else {
            Some(self.live[index].id.clone())
        };

        let id = PosId::allocate_between(lo.as_ref(), hi.as_ref());
        let timestamp = self.lamport.tick();
        let character = Character::new(id.clone(), value, timestamp, self.site);

        // allocate_between guarantees lo < id < hi, so `index` is exactly
        // where the new character belongs.
        self.live.insert(index, character);

        Ok(Operation::Insert {
            id,
            value,
            timestamp,
            site: self.site,
        })
    }

    /// Local delete at `index`. Returns `None` (non-fatal) when out of
    /// range, per spec.
    pub fn local_delete(&mut self, index: usize) -> Option<Operation> {
        if index >= self.live.len() {
            return None;
        }
        let removed = self.live.remove(index);
        let timestamp = self.lamport.tick();
        self.tombstones.insert(removed.id.clone());

        Some(Operation::Delete {
            id: removed.id,
            timestamp,
            site: self.site,
        })
    }

    /// Applies a remote operation. Idempotent and commutative over the
    /// full set of operations ever delivered to this replica (I6, P3, P4).
    /// Rejects a malformed operation (E1) with no state change.
    pub fn apply_remote(&mut self, op: Operation) -> Result<(), DocumentError> {
        op.validate()?;
        self.lamport.observe(op.timestamp());

        match op {
            Operation::Insert {
                id,
                value,
                timestamp,
                site,
            } => {
                // Delete wins over a late-arriving insert (P5): a
                // tombstoned id can never resurrect, and there is no
                // revoke operation.
                if self.tombstones.contains(&id) {
                    return Ok(());
                }

                let candidate = Character::new(id, value, timestamp, site);
                match self.live.binary_search(&candidate) {
                    Ok(_) => {
                        // Duplicate delivery of the same insert: drop (idempotent).
                    }
                    Err(insert_at) => self.live.insert(insert_at, candidate),
                }
            }
            Operation::Delete { id, .. } => {
                self.tombstones.insert(id.clone());
                // Live PosIds are unique under I1, so ordering by id
                // alone is enough to locate the match, if present.
                if let Ok(at) = self.live.binary_search_by(|c| c.id.cmp(&id)) {
                    self.live.remove(at);
                }
                // If not present, the delete is recorded as a pre-emptive
                // tombstone (handled above) that suppresses any later
                // insert with the same id (I2, I3).
            }
        }

        Ok(())
    }

    /// Serializes the full replica state for local persistence.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            live: self.live.clone(),
            tombstones: self.tombstones.iter().cloned().collect(),
            lamport: self.lamport.get(),
        }
    }

    /// Restores state from a snapshot, revalidating I1-I4. On failure,
    /// the replica is left as a fresh, empty one (spec §6).
    pub fn restore(site: SiteId, snapshot: Snapshot) -> Self {
        let mut replica = Self::new(site);

        if Self::revalidate(&snapshot) {
            replica.live = snapshot.live;
            replica.tombstones = snapshot.tombstones.into_iter().collect();
            replica.lamport.merge(snapshot.lamport);
        }

        replica
    }

    fn revalidate(snapshot: &Snapshot) -> bool {
        let sorted = snapshot.live.windows(2).all(|w| w[0] < w[1]);
        let no_overlap = snapshot
            .live
            .iter()
            .all(|c| !snapshot.tombstones.contains(&c.id));
        let clock_covers_all = snapshot
            .live
            .iter()
            .all(|c| c.lamport <= snapshot.lamport);
        sorted && no_overlap && clock_covers_all
    }
}
