//! The operation model (C3): the wire-level record of a single edit.
//!
//! Encoding is deterministic and self-describing (spec §4.3/§6): the
//! same operation produces the same bytes on every replica, and no
//! external schema negotiation is needed to interpret a message.

use crate::error::{DocumentError, MalformedOperationSnafu};
use crate::id::SiteId;
use crate::position::PosId;
use serde::{Deserialize, Serialize};
use snafu::ensure;

/// An insert or delete, carrying everything needed to apply it remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Operation {
    Insert {
        id: PosId,
        value: char,
        timestamp: u64,
        #[serde(rename = "siteId")]
        site: SiteId,
    },
    Delete {
        id: PosId,
        timestamp: u64,
        #[serde(rename = "siteId")]
        site: SiteId,
    },
}

impl Operation {
    pub fn id(&self) -> &PosId {
        match self {
            Operation::Insert { id, .. } => id,
            Operation::Delete { id, .. } => id,
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            Operation::Insert { timestamp, .. } => *timestamp,
            Operation::Delete { timestamp, .. } => *timestamp,
        }
    }

    pub fn site(&self) -> SiteId {
        match self {
            Operation::Insert { site, .. } => *site,
            Operation::Delete { site, .. } => *site,
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, Operation::Insert { .. })
    }

    /// Rejects an operation whose `id` violates the non-empty-PosId
    /// invariant — the one shape a successful JSON decode cannot itself
    /// rule out (spec §4.2, E1: "non-integer components" of a
    /// hand-rolled peer would fail to deserialize at all; an empty `id`
    /// array deserializes fine but is still malformed).
    pub fn validate(&self) -> Result<(), DocumentError> {
        ensure!(
            !self.id().components().is_empty(),
            MalformedOperationSnafu {
                reason: "operation id must have at least one component".to_string(),
            }
        );
        Ok(())
    }
}
