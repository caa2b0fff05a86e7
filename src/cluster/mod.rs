//! Replication mesh: wire envelopes, per-peer request/reply channels, and
//! the quorum coordinator that fans writes and reads out to the preference
//! list.

pub mod channel;
pub mod message;
pub mod quorum;

pub use channel::PeerChannel;
pub use message::{DataType, NodeMessage, Reply, ReplyStatus};
pub use quorum::{QuorumCoordinator, WriteOutcome};
