use serde_json::Value;

use crate::{
    // ---
    Address,
    GenericMessage,
    MessageCodec,
    MessageId,
    Result,
    WireMessage,
};

/// A message received by the bridge, either on a consumer or as a reply.
///
/// Carries the decoded [`GenericMessage`] together with the routing fields
/// needed to answer it: `reply_to` and `message_id`. Pass it to
/// [`AmqpBridge::send_reply`](crate::AmqpBridge::send_reply) to respond.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundMessage {
    address: Address,
    message: GenericMessage,
    reply_to: Option<Address>,
    message_id: Option<MessageId>,
    correlation_id: Option<MessageId>,
}

impl InboundMessage {
    /// Build an inbound message from a generic document, as if it had been
    /// received on `address`. The document must pass codec validation.
    pub fn new(address: impl Into<Address>, message: GenericMessage) -> Result<Self> {
        // ---
        let wire = MessageCodec::from_generic(&message)?;
        Ok(Self::from_wire(address.into(), &wire))
    }

    pub(crate) fn from_wire(address: Address, wire: &WireMessage) -> Self {
        // ---
        Self {
            address,
            message: MessageCodec::to_generic(wire),
            reply_to: wire.reply_to().map(Address::from),
            message_id: wire.message_id().cloned(),
            correlation_id: wire.correlation_id().cloned(),
        }
    }

    /// The address the message was received on.
    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn message(&self) -> &GenericMessage {
        &self.message
    }

    pub fn into_message(self) -> GenericMessage {
        self.message
    }

    pub fn body(&self) -> Option<&Value> {
        self.message.body()
    }

    pub fn reply_to(&self) -> Option<&Address> {
        self.reply_to.as_ref()
    }

    pub fn message_id(&self) -> Option<&MessageId> {
        self.message_id.as_ref()
    }

    pub fn correlation_id(&self) -> Option<&MessageId> {
        self.correlation_id.as_ref()
    }
}
