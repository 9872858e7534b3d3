// src/transport/memory/mod.rs

//! In-memory AMQP peer.
//!
//! A pure in-process implementation of the transport traits in
//! [`crate::domain`]. It backs the test suite and serves as the reference
//! for how a transport engine is expected to behave toward the bridge.
//!
//! ## Reference Semantics
//!
//! - A receiver attached with credit `n` is handed at most `n` deliveries
//!   until it grants more with `flow`.
//! - Messages addressed to a node with no credited receiver wait in the
//!   node's backlog; nothing is dropped.
//! - Dynamic attaches are answered with `_reply@N`, counting from 1 per peer.
//! - An anonymous sender routes by the message's `to` property and rejects
//!   messages without one.
//! - `disconnect` detaches every link of the connection at once.
//!
//! ## Non-Goals
//!
//! No framing, SASL, persistence, or redelivery. Failure modes exist only
//! where a test scripts them.

mod hub;
mod transport;

pub use hub::MemoryPeer;
