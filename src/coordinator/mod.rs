//! Cluster coordinator
//!
//! The coordinator holds no durable state and sits off the read/write
//! critical path. Storage nodes send it BROADCAST envelopes over the
//! request/reply channel; it multicasts each event to every connected SSE
//! subscriber.

pub mod server;
pub mod sse;

pub use server::CoordinatorServer;
pub use sse::SseHub;
