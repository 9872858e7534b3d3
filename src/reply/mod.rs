//! Request/reply correlation.
//!
//! Outgoing requests are stamped with the session's dynamic reply address as
//! `reply-to` and a fresh message id; the id keys a registration in the
//! [`ReplyRegistry`]. A reply arriving on the dynamic receiver is matched by
//! its `correlation-id` and completes the registration exactly once. Replies
//! that match nothing are logged and dropped.

mod registry;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::time::Instant;

pub(crate) use registry::{ReplyRegistry, ReplyResult};

use crate::session::SessionSnapshot;
use crate::{
    // ---
    BridgeError,
    CorrelationId,
    GenericMessage,
    InboundMessage,
    MessageCodec,
    Result,
    WireMessage,
};

/// A reply that has not arrived yet.
///
/// Resolves exactly once: to the reply, to [`BridgeError::ReplyTimeout`]
/// when the registration's deadline passes, or to
/// [`BridgeError::SessionClosed`] when the session ends first. Dropping it
/// does not cancel the registration; a late reply is then consumed and
/// discarded.
#[derive(Debug)]
#[must_use = "a PendingReply does nothing unless awaited"]
pub struct PendingReply {
    id: CorrelationId,
    rx: oneshot::Receiver<ReplyResult>,
}

impl PendingReply {
    /// The message id stamped on the request; the reply's correlation id
    /// must equal it.
    pub fn message_id(&self) -> &CorrelationId {
        &self.id
    }
}

impl Future for PendingReply {
    type Output = Result<InboundMessage>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // ---
        let this = self.get_mut();
        Pin::new(&mut this.rx).poll(cx).map(|received| match received {
            Ok(result) => result,
            Err(_) => Err(BridgeError::SessionClosed),
        })
    }
}

/// Caller-side half of the correlation machinery.
///
/// Cheap to clone. Registration and reply preparation run on the caller's
/// task; only the registry is shared with the session's delivery path.
#[derive(Clone)]
pub(crate) struct ReplyChannel {
    // ---
    registry: Arc<ReplyRegistry>,
    status: watch::Receiver<SessionSnapshot>,
    reply_timeout: Option<Duration>,
}

impl ReplyChannel {
    pub fn new(
        registry: Arc<ReplyRegistry>,
        status: watch::Receiver<SessionSnapshot>,
        reply_timeout: Option<Duration>,
    ) -> Self {
        // ---
        Self {
            registry,
            status,
            reply_timeout,
        }
    }

    /// Stamp `message` with the reply address and a new message id, and
    /// register a pending reply under that id.
    pub fn register_reply(&self, message: &mut WireMessage) -> Result<PendingReply> {
        // ---
        let reply_address = self.status.borrow().reply_address.clone().ok_or_else(|| {
            BridgeError::InvalidState(
                "No reply-to address available, unable to register reply handler".into(),
            )
        })?;

        let id = CorrelationId::generate();
        let props = message.properties_mut();
        props.reply_to = Some(reply_address.to_string());
        props.message_id = Some(id.to_message_id());

        let deadline = self.reply_timeout.map(|timeout| Instant::now() + timeout);
        let rx = self.registry.register(id.clone(), deadline);

        Ok(PendingReply { id, rx })
    }

    /// Drop a registration whose request never left.
    pub fn cancel(&self, pending: &PendingReply) {
        self.registry.cancel(&pending.id);
    }

    /// Encode a reply to `original`.
    ///
    /// The reply is addressed (`to`) to the original's `reply-to` and carries
    /// the original's message id as its correlation id, or no correlation id
    /// when the original had none. With `with_reply`, the reply is itself
    /// registered for an answer.
    pub fn prepare_reply(
        &self,
        original: &InboundMessage,
        reply: &GenericMessage,
        with_reply: bool,
    ) -> Result<(WireMessage, Option<PendingReply>)> {
        // ---
        let reply_to = original.reply_to().ok_or_else(|| {
            BridgeError::InvalidState(
                "Original message has no reply-to address, unable to send reply".into(),
            )
        })?;

        let mut wire = MessageCodec::from_generic(reply)?;
        let props = wire.properties_mut();
        props.to = Some(reply_to.to_string());
        props.correlation_id = original.message_id().cloned();

        let pending = if with_reply {
            Some(self.register_reply(&mut wire)?)
        } else {
            None
        };

        Ok((wire, pending))
    }
}
