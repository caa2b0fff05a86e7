//! # listkv
//!
//! A Dynamo-inspired, eventually-consistent key-value store for shared
//! shopping lists:
//! - Consistent-hash ring with replication factor N, quorum reads/writes (R, W)
//! - CRDT data model (vector clocks, LWW registers, PN counters, add-wins set)
//! - Hinted handoff for unreachable replicas
//! - Server-sent events fan-out through a single coordinator
//! - Local-first client sync engine with a durable pending-operation queue
//!
//! ## Architecture
//!
//! ```text
//!                    ┌──────────────────┐
//!                    │   Coordinator    │  SSE fan-out (/api/events)
//!                    │ (no durable      │◄───────── BROADCAST ──────┐
//!                    │  state)          │                           │
//!                    └──────────────────┘                           │
//!                                                                   │
//!   ┌────────────┐    ┌────────────┐    ┌────────────┐    ┌────────┴───┐
//!   │  Node A    │◄──►│  Node B    │◄──►│  Node C    │◄──►│  Node ...  │
//!   │ HTTP + set │    │ HTTP + set │    │ HTTP + set │    │            │
//!   │  + sled    │    │  + sled    │    │  + sled    │    │            │
//!   └─────▲──────┘    └────────────┘    └────────────┘    └────────────┘
//!         │ push/pull sync + SSE merge
//!   ┌─────┴──────┐
//!   │  Client    │  local-first mutations, pending-op queue
//!   └────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a storage node
//! ```bash
//! listkv-node --config cluster.json --port 7001
//! ```
//!
//! ### Start the coordinator
//! ```bash
//! listkv-coord --config cluster.json
//! ```
//!
//! ### Use the client CLI
//! ```bash
//! listkv create-list "Weekly groceries"
//! listkv add <list-id> "Milk" --quantity 2
//! listkv sync
//! listkv watch
//! ```

pub mod client;
pub mod cluster;
pub mod common;
pub mod coordinator;
pub mod crdt;
pub mod node;
pub mod store;

// Re-export commonly used types
pub use common::{ClusterConfig, Error, Result};
pub use coordinator::CoordinatorServer;
pub use node::NodeServer;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
