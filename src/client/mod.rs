//! Local-first client
//!
//! Every user action commits to the client's own durable store first; a
//! pending-operation queue records what the cluster still has to hear
//! about. The sync engine pushes the queue to any reachable node, pulls
//! known lists back, and merges server-sent events into local state with
//! the same CRDT rules the nodes use.

pub mod events;
pub mod pool;
pub mod sync;

pub use events::spawn_event_stream;
pub use pool::ServerPool;
pub use sync::{SyncEngine, SyncReport, SyncStatus};
