//! The live character: the unit the replica's sequence is built from.

use crate::id::SiteId;
use crate::position::PosId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A single character in the document, identified by a [`PosId`] plus
/// the (lamport, site) disambiguator pair used to break ties when two
/// replicas independently allocate an identical `PosId` (spec §4.2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    pub id: PosId,
    pub value: char,
    pub lamport: u64,
    pub site: SiteId,
}

impl Character {
    pub fn new(id: PosId, value: char, lamport: u64, site: SiteId) -> Self {
        Self {
            id,
            value,
            lamport,
            site,
        }
    }
}

/// Orders characters primarily by `PosId`; `lamport` then `site` break
/// ties between identical `PosId`s minted by different replicas. This
/// is what guarantees I1 (strict ascending order, no duplicates) even
/// when the fractional-id algebra alone cannot distinguish two ids.
impl Ord for Character {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id
            .cmp(&other.id)
            .then_with(|| self.lamport.cmp(&other.lamport))
            .then_with(|| self.site.cmp(&other.site))
    }
}

impl PartialOrd for Character {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
