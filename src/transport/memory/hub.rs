// src/transport/memory/hub.rs

//! Shared node and link state for the in-memory peer.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, Notify};

use super::transport::MemoryClient;
use crate::{
    // ---
    log_debug,
    log_trace,
    Address,
    Delivery,
    Disposition,
    TransportClientPtr,
    WireMessage,
};

/// Acquire mutex guard, ignoring poisoning
pub(super) fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Scripted failures. Each stays in force until [`MemoryPeer::clear_faults`].
#[derive(Clone, Debug, Default)]
pub(super) struct Faults {
    pub connect: Option<String>,
    pub open: Option<String>,
    pub dynamic_attach: Option<String>,
    pub send: Option<String>,
    pub close: Option<String>,
    pub hang_close: bool,
}

/// A node on the peer: a queue of undelivered messages plus the receiving
/// links attached to it.
#[derive(Default)]
struct Node {
    backlog: VecDeque<WireMessage>,
    links: Vec<u64>,
    cursor: usize,
    accepted: u64,
}

struct LinkEntry {
    address: Address,
    connection: u64,
    credit: u32,
    tx: mpsc::UnboundedSender<Delivery>,
}

#[derive(Default)]
struct ConnectionRecord {
    properties: BTreeMap<String, String>,
    opened: bool,
    closed: bool,
    disconnected: bool,
}

#[derive(Default)]
pub(super) struct PeerState {
    nodes: HashMap<Address, Node>,
    links: HashMap<u64, LinkEntry>,
    connections: HashMap<u64, ConnectionRecord>,
    pub(super) faults: Faults,
    next_connection: u64,
    next_link: u64,
    next_dynamic: u64,
    next_tag: u64,
    routed: u64,
}

impl PeerState {
    /// Hand backlog messages to links on `address` while any has credit.
    /// Links take turns.
    fn pump(&mut self, address: &Address) {
        // ---
        let PeerState {
            nodes,
            links,
            next_tag,
            ..
        } = self;

        let Some(node) = nodes.get_mut(address) else {
            return;
        };

        while !node.backlog.is_empty() && !node.links.is_empty() {
            let count = node.links.len();
            let ready = (0..count)
                .map(|offset| (node.cursor + offset) % count)
                .find(|&i| links.get(&node.links[i]).is_some_and(|l| l.credit > 0));

            let Some(index) = ready else {
                break;
            };
            let link_id = node.links[index];
            node.cursor = (index + 1) % count;

            let Some(message) = node.backlog.pop_front() else {
                break;
            };
            let Some(link) = links.get_mut(&link_id) else {
                break;
            };

            *next_tag += 1;
            let delivery = Delivery {
                tag: *next_tag,
                message,
            };

            match link.tx.send(delivery) {
                Ok(()) => link.credit -= 1,
                Err(returned) => {
                    // receiver dropped without detaching
                    node.backlog.push_front(returned.0.message);
                    node.links.retain(|id| *id != link_id);
                    links.remove(&link_id);
                    node.cursor = 0;
                }
            }
        }
    }

    pub(super) fn route(&mut self, address: Address, message: WireMessage) {
        // ---
        log_trace!("memory peer: route to {address}");
        self.routed += 1;
        self.nodes
            .entry(address.clone())
            .or_default()
            .backlog
            .push_back(message);
        self.pump(&address);
    }

    pub(super) fn add_connection(&mut self) -> u64 {
        // ---
        self.next_connection += 1;
        self.connections
            .insert(self.next_connection, ConnectionRecord::default());
        self.next_connection
    }

    pub(super) fn connection_open(&mut self, id: u64, properties: BTreeMap<String, String>) {
        // ---
        if let Some(record) = self.connections.get_mut(&id) {
            record.properties = properties;
            record.opened = true;
        }
    }

    pub(super) fn connection_closed(&mut self, id: u64) {
        if let Some(record) = self.connections.get_mut(&id) {
            record.closed = true;
        }
    }

    pub(super) fn connection_alive(&self, id: u64) -> bool {
        self.connections
            .get(&id)
            .is_some_and(|r| r.opened && !r.disconnected)
    }

    /// Drop every link owned by a connection.
    pub(super) fn disconnect(&mut self, id: u64) {
        // ---
        let owned: Vec<u64> = self
            .links
            .iter()
            .filter(|(_, link)| link.connection == id)
            .map(|(link_id, _)| *link_id)
            .collect();

        for link_id in owned {
            self.detach(link_id);
        }
        if let Some(record) = self.connections.get_mut(&id) {
            record.disconnected = true;
        }
    }

    pub(super) fn next_dynamic_address(&mut self) -> Address {
        // ---
        self.next_dynamic += 1;
        Address::from(format!("_reply@{}", self.next_dynamic))
    }

    pub(super) fn attach(
        &mut self,
        connection: u64,
        address: Address,
        credit: u32,
    ) -> (u64, mpsc::UnboundedReceiver<Delivery>) {
        // ---
        let (tx, rx) = mpsc::unbounded_channel();

        self.next_link += 1;
        let link_id = self.next_link;

        self.links.insert(
            link_id,
            LinkEntry {
                address: address.clone(),
                connection,
                credit,
                tx,
            },
        );
        self.nodes
            .entry(address.clone())
            .or_default()
            .links
            .push(link_id);

        log_debug!("memory peer: link {link_id} attached to {address} with credit {credit}");
        self.pump(&address);
        (link_id, rx)
    }

    pub(super) fn detach(&mut self, link_id: u64) {
        // ---
        if let Some(link) = self.links.remove(&link_id) {
            if let Some(node) = self.nodes.get_mut(&link.address) {
                node.links.retain(|id| *id != link_id);
                node.cursor = 0;
            }
            log_debug!("memory peer: link {link_id} detached from {}", link.address);
        }
    }

    pub(super) fn flow(&mut self, link_id: u64, credit: u32) {
        // ---
        let Some(link) = self.links.get_mut(&link_id) else {
            return;
        };
        link.credit = link.credit.saturating_add(credit);
        let address = link.address.clone();
        self.pump(&address);
    }

    pub(super) fn settle(&mut self, address: &Address, outcome: Disposition) {
        // ---
        if outcome == Disposition::Accepted {
            if let Some(node) = self.nodes.get_mut(address) {
                node.accepted += 1;
            }
        }
    }
}

pub(super) struct PeerInner {
    pub(super) state: Mutex<PeerState>,
    arrivals: Notify,
}

/// An in-process AMQP 1.0 peer.
///
/// Plays the remote side of a bridge connection: it holds named nodes with
/// message backlogs, assigns dynamic addresses (`_reply@1`, `_reply@2`, …),
/// enforces link credit, and records connection properties and
/// settlements. Cloning is cheap; clones share one peer.
///
/// Messages sent to a node with no attached receiver (or none with credit)
/// wait in the node's backlog, where tests can inspect them with
/// [`next_message`](Self::next_message) and [`take`](Self::take).
///
/// # Example
///
/// ```
/// # use amqp_bridge::{AmqpBridge, BridgeConfig, MemoryPeer, GenericMessage};
/// # async fn example() -> amqp_bridge::Result<()> {
/// let peer = MemoryPeer::new();
/// let bridge = AmqpBridge::new(peer.client(), BridgeConfig::default())?;
/// bridge.start("localhost", 5672, None).await?;
///
/// let producer = bridge.create_producer("orders").await?;
/// producer.send(GenericMessage::with_body("hello")).await?;
///
/// let sent = peer.next_message("orders").await;
/// assert!(sent.body.is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MemoryPeer {
    pub(super) inner: Arc<PeerInner>,
}

impl MemoryPeer {
    /// Create a new peer with no nodes.
    pub fn new() -> Self {
        // ---
        Self {
            inner: Arc::new(PeerInner {
                state: Mutex::new(PeerState::default()),
                arrivals: Notify::new(),
            }),
        }
    }

    /// A transport client that connects to this peer.
    pub fn client(&self) -> TransportClientPtr {
        Arc::new(MemoryClient::new(self.clone()))
    }

    pub(super) fn state(&self) -> MutexGuard<'_, PeerState> {
        lock_ignore_poison(&self.inner.state)
    }

    pub(super) fn route(&self, address: Address, message: WireMessage) {
        // ---
        self.state().route(address, message);
        self.inner.arrivals.notify_waiters();
    }

    /// Deliver a message to `address` as if a remote client had sent it.
    pub fn inject(&self, address: impl Into<Address>, message: WireMessage) {
        self.route(address.into(), message);
    }

    /// Messages routed to any node since the peer was created.
    pub fn routed_count(&self) -> u64 {
        self.state().routed
    }

    /// Remove and return every undelivered message waiting on `address`.
    pub fn take(&self, address: impl Into<Address>) -> Vec<WireMessage> {
        // ---
        let address = address.into();
        self.state()
            .nodes
            .get_mut(&address)
            .map(|node| node.backlog.drain(..).collect())
            .unwrap_or_default()
    }

    /// Wait for the next undelivered message on `address` and remove it.
    pub async fn next_message(&self, address: impl Into<Address>) -> WireMessage {
        // ---
        let address = address.into();

        loop {
            let notified = self.inner.arrivals.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next = self
                .state()
                .nodes
                .get_mut(&address)
                .and_then(|node| node.backlog.pop_front());

            if let Some(message) = next {
                return message;
            }
            notified.await;
        }
    }

    /// Number of undelivered messages waiting on `address`.
    pub fn backlog_len(&self, address: impl Into<Address>) -> usize {
        // ---
        let address = address.into();
        self.state()
            .nodes
            .get(&address)
            .map_or(0, |node| node.backlog.len())
    }

    /// Outstanding credit summed over the links attached to `address`.
    pub fn credit(&self, address: impl Into<Address>) -> u32 {
        // ---
        let address = address.into();
        let state = self.state();
        state
            .links
            .values()
            .filter(|l| l.address == address)
            .fold(0u32, |acc, l| acc.saturating_add(l.credit))
    }

    /// Number of receiving links attached to `address`.
    pub fn link_count(&self, address: impl Into<Address>) -> usize {
        // ---
        let address = address.into();
        self.state()
            .nodes
            .get(&address)
            .map_or(0, |node| node.links.len())
    }

    /// Deliveries on `address` settled as accepted.
    pub fn accepted(&self, address: impl Into<Address>) -> u64 {
        // ---
        let address = address.into();
        self.state()
            .nodes
            .get(&address)
            .map_or(0, |node| node.accepted)
    }

    /// Connection properties sent by the most recently opened connection.
    pub fn connection_properties(&self) -> Option<BTreeMap<String, String>> {
        // ---
        let state = self.state();
        state
            .connections
            .iter()
            .filter(|(_, r)| r.opened)
            .max_by_key(|(id, _)| **id)
            .map(|(_, r)| r.properties.clone())
    }

    /// Connections that are open and not yet disconnected.
    pub fn open_connections(&self) -> usize {
        // ---
        self.state()
            .connections
            .values()
            .filter(|r| r.opened && !r.disconnected)
            .count()
    }

    /// Connections that completed the close exchange.
    pub fn closed_connections(&self) -> usize {
        // ---
        self.state()
            .connections
            .values()
            .filter(|r| r.closed)
            .count()
    }

    /// Reject the next connects with `reason`.
    pub fn fail_connect(&self, reason: impl Into<String>) {
        self.state().faults.connect = Some(reason.into());
    }

    /// Reject the `open` exchange with `reason`.
    pub fn fail_open(&self, reason: impl Into<String>) {
        self.state().faults.open = Some(reason.into());
    }

    /// Refuse attaches that request a dynamic address.
    pub fn fail_dynamic_attach(&self, reason: impl Into<String>) {
        self.state().faults.dynamic_attach = Some(reason.into());
    }

    /// Fail every transfer with `reason`.
    pub fn fail_send(&self, reason: impl Into<String>) {
        self.state().faults.send = Some(reason.into());
    }

    /// Answer `close` with an error.
    pub fn fail_close(&self, reason: impl Into<String>) {
        self.state().faults.close = Some(reason.into());
    }

    /// Never answer `close`.
    pub fn hang_close(&self) {
        self.state().faults.hang_close = true;
    }

    /// Detach every receiver link on `address` from the peer side, as a
    /// broker does when it deletes a node. Returns the number of links.
    pub fn detach(&self, address: impl Into<Address>) -> usize {
        // ---
        let address = address.into();
        let mut state = self.state();

        let links: Vec<u64> = state
            .nodes
            .get(&address)
            .map(|node| node.links.clone())
            .unwrap_or_default();

        for link_id in &links {
            state.detach(*link_id);
        }
        links.len()
    }

    pub fn clear_faults(&self) {
        self.state().faults = Faults::default();
    }
}

impl Default for MemoryPeer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn msg(text: &str) -> WireMessage {
        WireMessage::with_value(text)
    }

    #[tokio::test]
    async fn backlog_waits_for_credit() {
        // ---
        let peer = MemoryPeer::new();
        peer.inject("q", msg("a"));
        peer.inject("q", msg("b"));

        let (link, mut rx) = peer.state().attach(1, Address::from("q"), 1);
        assert_eq!(peer.backlog_len("q"), 1);
        assert_eq!(rx.recv().await.map(|d| d.message), Some(msg("a")));

        peer.state().flow(link, 5);
        assert_eq!(rx.recv().await.map(|d| d.message), Some(msg("b")));
        assert_eq!(peer.credit("q"), 4);
        assert_eq!(peer.backlog_len("q"), 0);
    }

    #[tokio::test]
    async fn links_take_turns() {
        // ---
        let peer = MemoryPeer::new();
        let (_a, mut rx_a) = peer.state().attach(1, Address::from("q"), 10);
        let (_b, mut rx_b) = peer.state().attach(1, Address::from("q"), 10);

        for i in 0..4 {
            peer.inject("q", msg(&i.to_string()));
        }

        assert_eq!(rx_a.recv().await.map(|d| d.message), Some(msg("0")));
        assert_eq!(rx_b.recv().await.map(|d| d.message), Some(msg("1")));
        assert_eq!(rx_a.recv().await.map(|d| d.message), Some(msg("2")));
        assert_eq!(rx_b.recv().await.map(|d| d.message), Some(msg("3")));
    }

    #[tokio::test]
    async fn dropped_receiver_returns_message_to_backlog() {
        // ---
        let peer = MemoryPeer::new();
        let (_link, rx) = peer.state().attach(1, Address::from("q"), 10);
        drop(rx);

        peer.inject("q", msg("kept"));
        assert_eq!(peer.link_count("q"), 0);
        assert_eq!(peer.take("q"), vec![msg("kept")]);
    }

    #[tokio::test]
    async fn peer_detach_ends_receivers() {
        // ---
        let peer = MemoryPeer::new();
        let (_a, mut rx_a) = peer.state().attach(1, Address::from("q"), 10);
        let (_b, mut rx_b) = peer.state().attach(1, Address::from("q"), 10);

        assert_eq!(peer.detach("q"), 2);
        assert_eq!(peer.link_count("q"), 0);
        assert!(rx_a.recv().await.is_none());
        assert!(rx_b.recv().await.is_none());
        assert_eq!(peer.detach("q"), 0);
    }

    #[tokio::test]
    async fn dynamic_addresses_count_up() {
        // ---
        let peer = MemoryPeer::new();
        assert_eq!(peer.state().next_dynamic_address(), Address::from("_reply@1"));
        assert_eq!(peer.state().next_dynamic_address(), Address::from("_reply@2"));
    }

    #[tokio::test]
    async fn next_message_waits_for_arrival() {
        // ---
        let peer = MemoryPeer::new();
        let waiter = {
            let peer = peer.clone();
            tokio::spawn(async move { peer.next_message("later").await })
        };

        tokio::task::yield_now().await;
        peer.inject("later", msg("x"));

        assert_eq!(waiter.await.unwrap(), msg("x"));
    }
}
