// src/domain/transport.rs

//! Transport collaborator abstractions.
//!
//! This module defines the boundary between the bridge core and an AMQP 1.0
//! transport engine. Framing, SASL, TLS and link-level flow control belong to
//! the engine; the bridge only needs the handful of operations declared here.
//!
//! The shapes follow the AMQP object model:
//!
//! - a [`TransportClient`] connects to a peer and yields a [`Connection`],
//! - a [`Connection`] is opened, carries connection properties, and attaches
//!   links,
//! - a [`ReceiverLink`] yields [`Delivery`] values while it holds credit,
//! - a [`SenderLink`] transmits [`WireMessage`]s to its target, or to the
//!   message's `to` address when it was attached anonymously.
//!
//! Concrete implementations live under `src/transport/`.
//!
//! # Notes
//!
//! These traits use `async_trait`; the expanded documentation may show
//! explicit lifetimes and a boxed `Future`. Treat the methods as plain
//! `async fn`s.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::{Result, WireMessage};

/// A node address on the remote peer.
///
/// Addresses are opaque to the bridge: a queue name, a topic, or an address
/// assigned dynamically by the peer. They are immutable, cheap to clone, and
/// safe to share across threads.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub Arc<str>);

impl Address {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<T> From<T> for Address
where
    T: Into<Arc<str>>,
{
    fn from(value: T) -> Self {
        // ---
        Address(value.into())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// SASL PLAIN credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Parameters for [`TransportClient::connect`].
#[derive(Clone, Debug)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub credentials: Option<Credentials>,
    /// AMQP container id announced in the `open` frame.
    pub container_id: String,
}

/// Source requested when attaching a receiver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkSource {
    /// Attach to a fixed, named address.
    Address(Address),
    /// Ask the peer to create a node and assign its address.
    Dynamic,
}

/// Settlement outcome applied to a received delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    Accepted,
    Released,
}

/// A message received on a link, together with its delivery tag.
#[derive(Clone, Debug)]
pub struct Delivery {
    pub tag: u64,
    pub message: WireMessage,
}

/// Entry point to a transport engine.
#[async_trait::async_trait]
pub trait TransportClient: Send + Sync {
    // ---
    /// Establish a connection to the peer described by `options`.
    ///
    /// Fails with [`BridgeError::ConnectFailure`](crate::BridgeError::ConnectFailure).
    async fn connect(&self, options: &ConnectOptions) -> Result<Box<dyn Connection>>;
}

/// An established but not necessarily opened AMQP connection.
#[async_trait::async_trait]
pub trait Connection: Send {
    // ---
    /// Connection properties sent with `open`. Must be set before [`open`](Self::open).
    fn set_properties(&mut self, properties: BTreeMap<String, String>);

    /// Perform the `open` exchange.
    ///
    /// Fails with [`BridgeError::OpenFailure`](crate::BridgeError::OpenFailure).
    async fn open(&mut self) -> Result<()>;

    /// Attach a receiving link and grant it `initial_credit`.
    ///
    /// Returns once the peer has answered the attach, so the negotiated
    /// source (including a dynamically assigned one) is known.
    async fn create_receiver(
        &mut self,
        source: LinkSource,
        initial_credit: u32,
    ) -> Result<Box<dyn ReceiverLink>>;

    /// Attach a sending link. `None` attaches an anonymous sender that routes
    /// each message by its `to` property.
    async fn create_sender(&mut self, target: Option<Address>) -> Result<SenderPtr>;

    /// Perform the `close` exchange.
    async fn close(&mut self) -> Result<()>;

    /// Drop the socket and every link without any handshake. Infallible and
    /// idempotent.
    fn disconnect(&mut self);
}

/// The receiving end of an attached link.
#[async_trait::async_trait]
pub trait ReceiverLink: Send {
    // ---
    /// Source address as answered by the peer.
    fn remote_source(&self) -> Option<Address>;

    /// Grant `credit` additional deliveries.
    fn flow(&mut self, credit: u32) -> Result<()>;

    /// Wait for the next delivery. `None` once the link is detached.
    ///
    /// Must be cancel-safe: the bridge polls it inside `select!`.
    async fn recv(&mut self) -> Option<Delivery>;

    /// Settle a delivery.
    fn settle(&mut self, delivery: &Delivery, outcome: Disposition) -> Result<()>;

    /// Detach the link.
    async fn close(&mut self) -> Result<()>;
}

/// The sending end of an attached link.
#[async_trait::async_trait]
pub trait SenderLink: Send + Sync {
    // ---
    /// Target address, `None` for an anonymous sender.
    fn target(&self) -> Option<Address>;

    /// Transmit a message and wait for the transfer to be handed to the peer.
    async fn send(&self, message: WireMessage) -> Result<()>;

    /// Detach the link.
    async fn close(&self) -> Result<()>;
}

/// Shared transport client pointer.
pub type TransportClientPtr = Arc<dyn TransportClient>;

/// Shared sender link pointer. Sending needs only `&self`, so producers and
/// the reply path share one link without locking.
pub type SenderPtr = Arc<dyn SenderLink>;
