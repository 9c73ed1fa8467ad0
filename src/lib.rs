//! A convergent replicated text engine: the position algebra, replica
//! state, operation model, durable outbound queue, and reconnecting
//! transport session that together let independent editors converge on
//! identical text without central coordination.
//!
//! The relay (the one process-level collaborator outside this library)
//! lives in `src/bin/relay.rs`.

pub mod character;
pub mod config;
pub mod document;
pub mod error;
pub mod id;
pub mod operation;
pub mod position;
pub mod queue;
pub mod transport;

pub use character::Character;
pub use document::{Replica, Snapshot};
pub use error::{DocumentError, QueueError, TransportError};
pub use id::{LamportClock, SiteId};
pub use operation::Operation;
pub use position::PosId;
pub use queue::{MemoryQueueStore, OutboundQueue, QueueStore, QueuedOperation, SledQueueStore};
pub use transport::{ConnectionStatus, Connector, ReconnectPolicy, Session, SessionState, Transport, WireMessage};
