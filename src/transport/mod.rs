//! Transport implementations.
//!
//! Concrete implementations of the transport traits declared in
//! [`crate::domain`]. Bridge code depends only on those traits; a network
//! engine plugs in through [`TransportClientPtr`](crate::TransportClientPtr).

mod memory;

pub use memory::MemoryPeer;

/// A transport client connected to a fresh [`MemoryPeer`], returned
/// alongside the peer for inspection.
pub fn create_memory_transport() -> (crate::TransportClientPtr, MemoryPeer) {
    // ---
    let peer = MemoryPeer::new();
    (peer.client(), peer)
}
