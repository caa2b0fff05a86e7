//! Storage node: public HTTP API, CRDT apply logic, replication listener,
//! and the hinted-handoff queue.

pub mod apply;
pub mod context;
pub mod gossip;
pub mod handoff;
pub mod http;
pub mod server;

pub use context::NodeContext;
pub use handoff::HandoffQueue;
pub use server::NodeServer;
