use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::reply::ReplyChannel;
use crate::session::SessionHandle;
use crate::{
    // ---
    log_debug,
    Address,
    BridgeError,
    GenericMessage,
    MessageCodec,
    PendingReply,
    Result,
    SenderPtr,
};

/// Sends generic messages to one fixed AMQP address.
///
/// Cheap to clone; clones share the underlying link.
#[derive(Clone)]
pub struct ProducerEndpoint {
    // ---
    address: Address,
    link: SenderPtr,
    session: SessionHandle,
    replies: ReplyChannel,
    closed: Arc<AtomicBool>,
}

impl ProducerEndpoint {
    pub(crate) fn new(
        address: Address,
        link: SenderPtr,
        session: SessionHandle,
        replies: ReplyChannel,
    ) -> Self {
        // ---
        Self {
            address,
            link,
            session,
            replies,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The target address.
    pub fn address(&self) -> &Address {
        &self.address
    }

    fn ensure_usable(&self) -> Result<()> {
        // ---
        if self.closed.load(Ordering::Acquire) {
            return Err(BridgeError::InvalidState(format!(
                "producer for {} is closed",
                self.address
            )));
        }
        self.session.ensure_started("send")
    }

    /// Encode and transmit `message` without waiting for any reply.
    ///
    /// # Errors
    ///
    /// [`BridgeError::InvalidState`] if the session is not started or the
    /// producer was closed, [`BridgeError::Codec`] if the message is not
    /// schema-legal, or the transport's error.
    pub async fn send(&self, message: GenericMessage) -> Result<()> {
        // ---
        self.ensure_usable()?;
        let wire = MessageCodec::from_generic(&message)?;
        self.session.transmit(self.link.clone(), wire).await
    }

    /// Encode `message`, register for its reply and transmit it.
    ///
    /// The returned [`PendingReply`] resolves to the reply whose correlation
    /// id matches the message id stamped here. If the transmit fails the
    /// registration is removed and the error returned.
    ///
    /// # Errors
    ///
    /// As [`send`](Self::send), plus [`BridgeError::InvalidState`] when the
    /// session has no reply address.
    pub async fn send_with_reply(&self, message: GenericMessage) -> Result<PendingReply> {
        // ---
        self.ensure_usable()?;
        let mut wire = MessageCodec::from_generic(&message)?;
        let pending = self.replies.register_reply(&mut wire)?;

        if let Err(err) = self.session.transmit(self.link.clone(), wire).await {
            self.replies.cancel(&pending);
            return Err(err);
        }

        log_debug!(
            "request {} sent to {}",
            pending.message_id(),
            self.address
        );
        Ok(pending)
    }

    /// Detach the sending link. Later sends fail with `InvalidState`.
    /// Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        // ---
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.link.close().await
    }
}
