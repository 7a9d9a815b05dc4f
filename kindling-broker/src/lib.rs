//! The Kindling MQTT v3.1.1 broker core: Topic Index, Session Table,
//! Inflight Tracker, Packet Router and Publisher, plus the connection
//! plumbing and accept loop that run them as a standalone TCP service.
//!
//! State-mutating work — everything touching the Topic Index or Session
//! Table — happens exclusively on the single protocol-worker task spawned
//! by [`server::Listener::bind`] and driven by [`broker::Broker::run`].
//! Connection tasks only ever hand decoded packets to that worker and
//! drain encoded frames back out; see the crate's concurrency model in its
//! top-level design notes.

pub mod auth;
pub mod broker;
pub mod connection;
pub mod error;
pub mod inflight;
pub mod server;
pub mod session;
pub mod stats;
pub mod topic_tree;
