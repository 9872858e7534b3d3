//! Public entry point.
//!
//! [`AmqpBridge`] composes the transport session, the reply channel and the
//! per-address endpoints behind one cheap-to-clone handle.

use std::sync::Arc;

use crate::reply::{ReplyChannel, ReplyRegistry};
use crate::session::{SessionHandle, SessionState};
use crate::{
    // ---
    log_debug,
    Address,
    AmqpBridgeBuilder,
    BridgeConfig,
    BridgeError,
    ConnectOptions,
    ConsumerEndpoint,
    Credentials,
    GenericMessage,
    InboundMessage,
    PendingReply,
    ProducerEndpoint,
    Result,
    TransportClientPtr,
};

/// Bridge between an AMQP 1.0 peer and a pub/sub bus.
///
/// One bridge owns exactly one transport session. Producers and consumers
/// can be created only while the session is [`SessionState::Started`].
///
/// # Example
///
/// ```
/// use amqp_bridge::{AmqpBridge, BridgeConfig, GenericMessage, MemoryPeer};
///
/// # async fn example() -> amqp_bridge::Result<()> {
/// let peer = MemoryPeer::new();
/// let bridge = AmqpBridge::new(peer.client(), BridgeConfig::default())?;
/// bridge.start("localhost", 5672, None).await?;
///
/// let consumer = bridge.create_consumer("requests").await?;
/// let replier = bridge.clone();
/// consumer.handler(move |request| {
///     let replier = replier.clone();
///     async move {
///         let reply = GenericMessage::with_body(request.body().cloned().unwrap_or_default());
///         replier.send_reply(&request, reply).await
///     }
/// })?;
///
/// let producer = bridge.create_producer("requests").await?;
/// let reply = producer
///     .send_with_reply(GenericMessage::with_body("ping"))
///     .await?
///     .await?;
/// assert_eq!(reply.body(), Some(&serde_json::json!("ping")));
///
/// bridge.shutdown().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AmqpBridge {
    inner: Arc<Inner>,
}

struct Inner {
    // ---
    config: BridgeConfig,
    session: SessionHandle,
    replies: ReplyChannel,
    registry: Arc<ReplyRegistry>,
}

impl AmqpBridge {
    /// Create a bridge over `transport`. The session starts in
    /// [`SessionState::NotStarted`].
    ///
    /// Spawns the session actor, so it must be called from within a Tokio
    /// runtime.
    ///
    /// # Errors
    ///
    /// [`BridgeError::InvalidConfig`] if `config` does not validate.
    pub fn new(transport: TransportClientPtr, config: BridgeConfig) -> Result<Self> {
        // ---
        config.validate()?;

        let registry = Arc::new(ReplyRegistry::new());
        let session = SessionHandle::spawn(transport, &config, Arc::clone(&registry));
        let replies = ReplyChannel::new(
            Arc::clone(&registry),
            session.status(),
            config.reply_timeout,
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                session,
                replies,
                registry,
            }),
        })
    }

    pub fn builder() -> AmqpBridgeBuilder {
        AmqpBridgeBuilder::new()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SessionState {
        self.inner.session.state()
    }

    /// The dynamic reply address negotiated by `start`, if any.
    pub fn reply_address(&self) -> Option<Address> {
        self.inner.session.reply_address()
    }

    /// Reply registrations that are still waiting.
    pub fn pending_replies(&self) -> usize {
        self.inner.registry.len()
    }

    /// Connect, open and, when reply support is enabled, attach the dynamic
    /// reply receiver. Resolves once the session is started.
    ///
    /// # Errors
    ///
    /// [`BridgeError::ConnectFailure`] or [`BridgeError::OpenFailure`]; the
    /// session is then [`SessionState::Failed`]. [`BridgeError::InvalidState`]
    /// if the session was already started once.
    pub async fn start(
        &self,
        host: &str,
        port: u16,
        credentials: Option<Credentials>,
    ) -> Result<()> {
        // ---
        let options = ConnectOptions {
            host: host.to_string(),
            port,
            credentials,
            container_id: self.inner.config.container_id.clone(),
        };
        self.inner.session.start(options).await
    }

    /// Attach a sender to `address`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::InvalidState`] unless the session is started.
    pub async fn create_producer(&self, address: impl Into<Address>) -> Result<ProducerEndpoint> {
        // ---
        let address = address.into();
        self.inner.session.ensure_started("create producer")?;

        let link = self.inner.session.attach_sender(address.clone()).await?;
        log_debug!("producer created for {address}");

        Ok(ProducerEndpoint::new(
            address,
            link,
            self.inner.session.clone(),
            self.inner.replies.clone(),
        ))
    }

    /// Attach a receiver to `address` with a credit window of
    /// [`BridgeConfig::max_buffered`].
    ///
    /// # Errors
    ///
    /// [`BridgeError::InvalidState`] unless the session is started.
    pub async fn create_consumer(&self, address: impl Into<Address>) -> Result<ConsumerEndpoint> {
        // ---
        let address = address.into();
        self.inner.session.ensure_started("create consumer")?;

        let max_buffered = self.inner.config.max_buffered;
        let credit = u32::try_from(max_buffered).map_err(|_| {
            BridgeError::InvalidConfig(format!("max_buffered {max_buffered} exceeds link credit"))
        })?;

        let link = self
            .inner
            .session
            .attach_receiver(address.clone(), credit)
            .await?;
        log_debug!("consumer created for {address}");

        Ok(ConsumerEndpoint::spawn(
            address,
            link,
            max_buffered,
            self.inner.session.status(),
        ))
    }

    /// Answer `original` with `reply`.
    ///
    /// The reply goes to the original's `reply_to` and carries its message id
    /// as correlation id, so a peer bridge can match it to its request.
    ///
    /// # Errors
    ///
    /// [`BridgeError::InvalidState`] if `original` has no `reply_to` (nothing
    /// is transmitted) or the session is not started.
    pub async fn send_reply(&self, original: &InboundMessage, reply: GenericMessage) -> Result<()> {
        // ---
        let (wire, _) = self.inner.replies.prepare_reply(original, &reply, false)?;
        self.inner.session.send_reply(wire).await
    }

    /// Answer `original` and register for an answer to the reply itself.
    pub async fn send_reply_with_reply(
        &self,
        original: &InboundMessage,
        reply: GenericMessage,
    ) -> Result<PendingReply> {
        // ---
        let (wire, pending) = self.inner.replies.prepare_reply(original, &reply, true)?;
        let pending = pending.ok_or_else(|| {
            BridgeError::InvalidState("reply registration was not created".into())
        })?;

        if let Err(err) = self.inner.session.send_reply(wire).await {
            self.inner.replies.cancel(&pending);
            return Err(err);
        }
        Ok(pending)
    }

    /// Close the connection and release it locally whatever the outcome of
    /// the close handshake. Consumers end and pending replies fail with
    /// [`BridgeError::SessionClosed`]. A no-op when no connection exists.
    ///
    /// # Errors
    ///
    /// [`BridgeError::ShutdownFailure`] if the handshake failed or timed out.
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.session.shutdown().await
    }
}
