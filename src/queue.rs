//! The durable outbound queue (C4): a FIFO of locally produced
//! operations awaiting relay acknowledgement, surviving restarts and
//! connection loss.

use crate::error::{EncodeSnafu, PersistenceSnafu, QueueError};
use crate::operation::Operation;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Default retention window (spec §4.4): bounds disk growth when a
/// replica has been permanently abandoned by its peers.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// A locally-unique id for a queued entry. Never reused.
pub type QueueId = u64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedOperation {
    pub op: Operation,
    pub queue_id: QueueId,
    pub enqueued_at_millis: u64,
}

/// The narrow capability interface the queue persists through. Allows
/// in-memory fakes in tests, per §9's note on injected collaborators.
pub trait QueueStore: Send {
    fn load_all(&self) -> Result<Vec<QueuedOperation>, QueueError>;
    fn persist_all(&self, entries: &[QueuedOperation]) -> Result<(), QueueError>;
}

/// A `sled`-backed store: the default physical store per §4.4 ("whatever
/// local persistent map the host offers"). Each mutation is written and
/// flushed before `enqueue`/`ack`/`evict_stale` return, satisfying the
/// durability requirement that a crash never loses an acknowledged
/// mutation.
pub struct SledQueueStore {
    tree: sled::Tree,
}

impl SledQueueStore {
    const KEY: &'static [u8] = b"queue";

    pub fn open(db: &sled::Db, document_id: &str) -> Result<Self, QueueError> {
        let tree = db
            .open_tree(format!("queue-{document_id}"))
            .context(PersistenceSnafu)?;
        Ok(Self { tree })
    }
}

impl QueueStore for SledQueueStore {
    fn load_all(&self) -> Result<Vec<QueuedOperation>, QueueError> {
        match self.tree.get(Self::KEY).context(PersistenceSnafu)? {
            Some(bytes) => bincode::deserialize(&bytes).context(EncodeSnafu),
            None => Ok(Vec::new()),
        }
    }

    fn persist_all(&self, entries: &[QueuedOperation]) -> Result<(), QueueError> {
        let bytes = bincode::serialize(entries).context(EncodeSnafu)?;
        self.tree.insert(Self::KEY, bytes).context(PersistenceSnafu)?;
        self.tree.flush().context(PersistenceSnafu)?;
        Ok(())
    }
}

/// An in-memory store. Used as the degrade-to-best-effort fallback on
/// persistence failure (E4) and as the fake for unit tests.
#[derive(Default)]
pub struct MemoryQueueStore {
    entries: std::sync::Mutex<Vec<QueuedOperation>>,
}

impl QueueStore for MemoryQueueStore {
    fn load_all(&self) -> Result<Vec<QueuedOperation>, QueueError> {
        Ok(self.entries.lock().unwrap().clone())
    }

    fn persist_all(&self, entries: &[QueuedOperation]) -> Result<(), QueueError> {
        *self.entries.lock().unwrap() = entries.to_vec();
        Ok(())
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// The outbound queue itself. Strict FIFO by enqueue time on a single
/// replica (spec §4.4); convergence across replicas is the CRDT's job,
/// not the queue's.
pub struct OutboundQueue {
    store: Box<dyn QueueStore>,
    entries: BTreeMap<QueueId, QueuedOperation>,
    order: Vec<QueueId>,
    next_id: QueueId,
    degraded: bool,
}

impl OutboundQueue {
    /// Loads any persisted entries and resumes from them (spec P6).
    pub fn open(store: Box<dyn QueueStore>) -> Self {
        let loaded = store.load_all().unwrap_or_else(|e| {
            warn!("queue persistence unreadable, starting empty: {e}");
            Vec::new()
        });

        let next_id = loaded.iter().map(|e| e.queue_id).max().map_or(0, |m| m + 1);
        let order = loaded.iter().map(|e| e.queue_id).collect();
        let entries = loaded.into_iter().map(|e| (e.queue_id, e)).collect();

        Self {
            store,
            entries,
            order,
            next_id,
            degraded: false,
        }
    }

    /// True once a persistence write has failed; the queue still works,
    /// purely in memory, but the caller should tell the user pending
    /// edits may be lost on restart (E4, spec §7).
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn size(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Appends `op`, persisting synchronously before returning.
    pub fn enqueue(&mut self, op: Operation) -> QueueId {
        let queue_id = self.next_id;
        self.next_id += 1;

        let entry = QueuedOperation {
            op,
            queue_id,
            enqueued_at_millis: now_millis(),
        };
        self.order.push(queue_id);
        self.entries.insert(queue_id, entry);
        self.persist();

        queue_id
    }

    /// A snapshot of queued entries in enqueue order.
    pub fn peek_all(&self) -> Vec<QueuedOperation> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id))
            .cloned()
            .collect()
    }

    /// Removes the named entries and persists.
    pub fn ack(&mut self, queue_ids: &[QueueId]) {
        if queue_ids.is_empty() {
            return;
        }
        for id in queue_ids {
            self.entries.remove(id);
        }
        self.order.retain(|id| self.entries.contains_key(id));
        self.persist();
    }

    /// Removes entries older than `max_age`. Default retention is the
    /// seven-day window of spec §4.4.
    pub fn evict_stale(&mut self, max_age: Duration) {
        let cutoff = now_millis().saturating_sub(max_age.as_millis() as u64);
        let before = self.order.len();

        self.entries.retain(|_, e| e.enqueued_at_millis >= cutoff);
        self.order.retain(|id| self.entries.contains_key(id));

        let evicted = before - self.order.len();
        if evicted > 0 {
            self.persist();
        }
    }

    fn persist(&mut self) {
        let snapshot = self.peek_all();
        if let Err(e) = self.store.persist_all(&snapshot) {
            warn!("queue persistence write failed, degrading to in-memory: {e}");
            self.degraded = true;
        }
    }
}
