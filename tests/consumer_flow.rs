mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use amqp_bridge::{
    //
    Address,
    BridgeConfig,
    BridgeError,
    ConsumerEndpoint,
    GenericMessage,
    InboundMessage,
    MemoryPeer,
    MessageId,
    WireMessage,
};
use serde_json::json;
use tokio::sync::mpsc;

use common::{eventually, started_bridge};

/// Install a handler that forwards every message body to the returned
/// channel.
fn collect(consumer: &ConsumerEndpoint) -> mpsc::UnboundedReceiver<InboundMessage> {
    // ---
    let (tx, rx) = mpsc::unbounded_channel();
    consumer
        .handler(move |message| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(message);
                Ok(())
            }
        })
        .unwrap();
    rx
}

fn collect_errors(consumer: &ConsumerEndpoint) -> mpsc::UnboundedReceiver<BridgeError> {
    // ---
    let (tx, rx) = mpsc::unbounded_channel();
    consumer
        .exception_handler(move |err| {
            let _ = tx.send(err);
        })
        .unwrap();
    rx
}

fn inject_numbered(peer: &MemoryPeer, address: &str, count: i64) {
    for n in 0..count {
        peer.inject(address, WireMessage::with_value(n));
    }
}

async fn expect_bodies(rx: &mut mpsc::UnboundedReceiver<InboundMessage>, expected: &[i64]) {
    // ---
    for want in expected {
        let message = rx.recv().await.unwrap();
        assert_eq!(message.body(), Some(&json!(want)));
    }
}

#[tokio::test]
async fn delivers_in_order_and_accepts() {
    // ---
    let peer = MemoryPeer::new();
    let bridge = started_bridge(&peer, BridgeConfig::default()).await;
    let consumer = bridge.create_consumer("events").await.unwrap();
    assert_eq!(consumer.address().as_str(), "events");
    assert_eq!(peer.credit("events"), 1000);

    let mut rx = collect(&consumer);
    inject_numbered(&peer, "events", 10);

    expect_bodies(&mut rx, &(0..10).collect::<Vec<i64>>()).await;
    eventually("all settled", || peer.accepted("events") == 10).await;
    assert_eq!(peer.backlog_len("events"), 0);
}

#[tokio::test]
async fn buffers_until_handler_installed() {
    // ---
    let peer = MemoryPeer::new();
    let bridge = started_bridge(&peer, BridgeConfig::default()).await;
    let consumer = bridge.create_consumer("events").await.unwrap();

    inject_numbered(&peer, "events", 3);
    eventually("buffered", || consumer.buffered() == 3).await;
    assert_eq!(peer.accepted("events"), 3);

    let mut rx = collect(&consumer);
    expect_bodies(&mut rx, &[0, 1, 2]).await;
    eventually("buffer drained", || consumer.buffered() == 0).await;
}

#[tokio::test]
async fn full_buffer_stops_the_peer() {
    // ---
    let peer = MemoryPeer::new();
    let config = BridgeConfig::default().with_max_buffered(2);
    let bridge = started_bridge(&peer, config).await;
    let consumer = bridge.create_consumer("events").await.unwrap();
    assert_eq!(peer.credit("events"), 2);

    inject_numbered(&peer, "events", 5);
    eventually("window filled", || consumer.buffered() == 2).await;
    assert_eq!(peer.backlog_len("events"), 3);
    assert_eq!(peer.credit("events"), 0);

    let mut rx = collect(&consumer);
    expect_bodies(&mut rx, &[0, 1, 2, 3, 4]).await;
    eventually("backlog drained", || peer.backlog_len("events") == 0).await;
    eventually("window restored", || peer.credit("events") == 2).await;
}

#[tokio::test]
async fn pause_holds_messages_until_resume() {
    // ---
    let peer = MemoryPeer::new();
    let bridge = started_bridge(&peer, BridgeConfig::default()).await;
    let consumer = bridge.create_consumer("events").await.unwrap();
    let mut rx = collect(&consumer);

    consumer.pause().unwrap();
    assert!(consumer.is_paused());

    inject_numbered(&peer, "events", 4);
    eventually("buffered while paused", || consumer.buffered() == 4).await;
    assert!(rx.try_recv().is_err());

    consumer.resume().unwrap();
    assert!(!consumer.is_paused());
    expect_bodies(&mut rx, &[0, 1, 2, 3]).await;
}

#[tokio::test]
async fn growing_the_buffer_grants_credit() {
    // ---
    let peer = MemoryPeer::new();
    let config = BridgeConfig::default().with_max_buffered(2);
    let bridge = started_bridge(&peer, config).await;
    let consumer = bridge.create_consumer("events").await.unwrap();

    inject_numbered(&peer, "events", 5);
    eventually("window filled", || consumer.buffered() == 2).await;

    consumer.set_max_buffered(4).unwrap();
    assert_eq!(consumer.max_buffered(), 4);
    eventually("window grown", || consumer.buffered() == 4).await;
    assert_eq!(peer.backlog_len("events"), 1);

    assert!(matches!(
        consumer.set_max_buffered(0),
        Err(BridgeError::InvalidConfig(_))
    ));
    assert_eq!(consumer.max_buffered(), 4);
}

#[tokio::test]
async fn shrinking_the_buffer_reports_overflow() {
    // ---
    let peer = MemoryPeer::new();
    let config = BridgeConfig::default().with_max_buffered(4);
    let bridge = started_bridge(&peer, config).await;
    let consumer = bridge.create_consumer("events").await.unwrap();
    let mut errors = collect_errors(&consumer);

    // the peer still holds credit for four deliveries
    consumer.set_max_buffered(1).unwrap();
    inject_numbered(&peer, "events", 3);

    for _ in 0..2 {
        match errors.recv().await.unwrap() {
            BridgeError::BufferOverflow { address, max } => {
                assert_eq!(address, "events");
                assert_eq!(max, 1);
            }
            other => panic!("expected overflow, got {other:?}"),
        }
    }
    assert_eq!(consumer.buffered(), 1);
    assert_eq!(peer.accepted("events"), 3);

    let mut rx = collect(&consumer);
    expect_bodies(&mut rx, &[0]).await;
}

#[tokio::test]
async fn handler_failures_go_to_exception_handler() {
    // ---
    let peer = MemoryPeer::new();
    let bridge = started_bridge(&peer, BridgeConfig::default()).await;
    let consumer = bridge.create_consumer("events").await.unwrap();
    let mut errors = collect_errors(&consumer);

    let handled = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&handled);
    consumer
        .handler(move |message| {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                match message.body().and_then(|b| b.as_str()) {
                    Some("fail") => Err(BridgeError::Handler("rejected".into())),
                    Some("panic") => panic!("handler blew up"),
                    _ => Ok(()),
                }
            }
        })
        .unwrap();

    for text in ["ok", "fail", "panic", "ok"] {
        peer.inject("events", WireMessage::with_value(text));
    }

    let first = errors.recv().await.unwrap();
    assert!(matches!(first, BridgeError::Handler(ref m) if m == "rejected"));
    let second = errors.recv().await.unwrap();
    assert!(matches!(second, BridgeError::Handler(ref m) if m.contains("panicked")));

    eventually("every message handled", || handled.load(Ordering::SeqCst) == 4).await;
    assert!(consumer.is_registered());
    assert_eq!(peer.accepted("events"), 4);
}

#[tokio::test]
async fn unregister_detaches_and_runs_end_handler() {
    // ---
    let peer = MemoryPeer::new();
    let bridge = started_bridge(&peer, BridgeConfig::default()).await;
    let consumer = bridge.create_consumer("events").await.unwrap();
    assert_eq!(peer.link_count("events"), 1);

    let ended = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ended);
    consumer
        .end_handler(move || flag.store(true, Ordering::SeqCst))
        .unwrap();

    inject_numbered(&peer, "events", 2);
    eventually("buffered", || consumer.buffered() == 2).await;

    consumer.unregister().await.unwrap();

    assert!(ended.load(Ordering::SeqCst));
    assert!(!consumer.is_registered());
    assert_eq!(consumer.buffered(), 0);
    assert_eq!(peer.link_count("events"), 0);

    assert!(matches!(
        consumer.handler(|_| async { Ok(()) }),
        Err(BridgeError::InvalidState(_))
    ));
    assert!(matches!(consumer.pause(), Err(BridgeError::InvalidState(_))));
    consumer.unregister().await.unwrap();

    // new messages wait on the peer
    inject_numbered(&peer, "events", 1);
    assert_eq!(peer.backlog_len("events"), 1);
}

#[tokio::test]
async fn shutdown_ends_consumers() {
    // ---
    let peer = MemoryPeer::new();
    let bridge = started_bridge(&peer, BridgeConfig::default()).await;
    let consumer = bridge.create_consumer("events").await.unwrap();

    let (end_tx, mut end_rx) = mpsc::unbounded_channel();
    consumer
        .end_handler(move || {
            let _ = end_tx.send(());
        })
        .unwrap();

    bridge.shutdown().await.unwrap();

    end_rx.recv().await.unwrap();
    assert!(!consumer.is_registered());
    assert_eq!(peer.link_count("events"), 0);
}

#[tokio::test]
async fn dropping_the_endpoint_unregisters() {
    // ---
    let peer = MemoryPeer::new();
    let bridge = started_bridge(&peer, BridgeConfig::default()).await;
    let consumer = bridge.create_consumer("events").await.unwrap();
    let clone = consumer.clone();

    drop(consumer);
    assert!(clone.is_registered());
    assert_eq!(peer.link_count("events"), 1);

    drop(clone);
    eventually("link detached", || peer.link_count("events") == 0).await;
}

#[tokio::test]
async fn consumers_share_an_address() {
    // ---
    let peer = MemoryPeer::new();
    let bridge = started_bridge(&peer, BridgeConfig::default()).await;
    let left = bridge.create_consumer("work").await.unwrap();
    let right = bridge.create_consumer("work").await.unwrap();
    let mut left_rx = collect(&left);
    let mut right_rx = collect(&right);

    inject_numbered(&peer, "work", 4);
    expect_bodies(&mut left_rx, &[0, 2]).await;
    expect_bodies(&mut right_rx, &[1, 3]).await;
}

#[tokio::test]
async fn inbound_message_exposes_routing_fields() {
    // ---
    let peer = MemoryPeer::new();
    let bridge = started_bridge(&peer, BridgeConfig::default()).await;
    let consumer = bridge.create_consumer("requests").await.unwrap();
    let mut rx = collect(&consumer);

    let mut request = WireMessage::with_value("lookup");
    request.properties_mut().reply_to = Some("client-inbox".into());
    request.properties_mut().message_id = Some(MessageId::from(42u64));
    peer.inject("requests", request);

    let received = rx.recv().await.unwrap();
    assert_eq!(received.address().as_str(), "requests");
    assert_eq!(received.reply_to(), Some(&Address::from("client-inbox")));
    assert_eq!(received.message_id(), Some(&MessageId::from(42u64)));
    assert_eq!(received.body(), Some(&json!("lookup")));

    bridge
        .send_reply(&received, GenericMessage::with_body("found"))
        .await
        .unwrap();

    let reply = peer.next_message("client-inbox").await;
    assert_eq!(reply.correlation_id(), Some(&MessageId::from(42u64)));
}

#[tokio::test]
async fn handler_can_be_replaced() {
    // ---
    let peer = MemoryPeer::new();
    let bridge = started_bridge(&peer, BridgeConfig::default()).await;
    let consumer = bridge.create_consumer("events").await.unwrap();

    let mut first = collect(&consumer);
    peer.inject("events", WireMessage::with_value(1i64));
    expect_bodies(&mut first, &[1]).await;

    let mut second = collect(&consumer);
    peer.inject("events", WireMessage::with_value(2i64));
    expect_bodies(&mut second, &[2]).await;
    assert!(first.try_recv().is_err());
}
