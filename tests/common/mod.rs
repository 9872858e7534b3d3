#![allow(dead_code)]

use std::time::Duration;

use amqp_bridge::{AmqpBridge, BridgeConfig, GenericMessage, MemoryPeer, MessageCodec, WireMessage};
use serde_json::Value;
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

pub fn init_logging() {
    // ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// A bridge on `peer`, started.
pub async fn started_bridge(peer: &MemoryPeer, config: BridgeConfig) -> AmqpBridge {
    // ---
    init_logging();
    let bridge = AmqpBridge::new(peer.client(), config).expect("valid config");
    bridge
        .start("localhost", 5672, None)
        .await
        .expect("bridge should start");
    bridge
}

/// Poll `condition` until it holds, panicking after five seconds.
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    // ---
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Decode a wire message to the bus representation.
pub fn generic(wire: &WireMessage) -> GenericMessage {
    MessageCodec::to_generic(wire)
}

pub fn body(wire: &WireMessage) -> Option<Value> {
    generic(wire).body().cloned()
}

/// Encode a bus document, panicking on codec errors.
pub fn wire(doc: Value) -> WireMessage {
    // ---
    let doc = GenericMessage::from_value(doc).expect("object document");
    MessageCodec::from_generic(&doc).expect("schema-legal document")
}
