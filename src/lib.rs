//! Bridge an AMQP 1.0 peer to a pub/sub bus, with request/reply correlation
//! over a dynamically negotiated reply address.
//!
//! Wire messages are translated to and from [`GenericMessage`], a JSON
//! document with the top-level keys `body`, `body_type`, `header`,
//! `properties`, `application_properties` and `message_annotations`.
//! Requests sent with [`ProducerEndpoint::send_with_reply`] are stamped with
//! the session's reply address and a fresh message id; the matching reply
//! resolves the returned [`PendingReply`].
//!
//! The AMQP engine itself is a collaborator behind the [`TransportClient`]
//! trait. [`MemoryPeer`] is an in-process implementation for tests and local
//! runs.
//!

// Import all sub modules once...
mod macros;

mod domain;

mod codec;
mod endpoint;
mod reply;
mod session;
mod transport;

mod bridge;
mod bridge_builder;
mod bridge_config;

mod correlation;
mod error;

pub(crate) use macros::{log_debug, log_error, log_info, log_trace, log_warn};

// Re-export main types
pub use bridge::AmqpBridge;
pub use bridge_builder::AmqpBridgeBuilder;
pub use bridge_config::{BridgeConfig, DEFAULT_MAX_BUFFERED, DEFAULT_REPLY_CREDIT};

pub use codec::{keys, GenericMessage, MessageCodec};
pub use endpoint::{ConsumerEndpoint, InboundMessage, ProducerEndpoint};
pub use reply::PendingReply;
pub use session::SessionState;

pub use correlation::CorrelationId;
pub use error::{BridgeError, Result};

pub use transport::{create_memory_transport, MemoryPeer};

// --- public re-exports
pub use domain::{
    //
    Address,
    AmqpValue,
    Body,
    ConnectOptions,
    Connection,
    Credentials,
    Delivery,
    Disposition,
    Header,
    LinkSource,
    MessageId,
    Properties,
    ReceiverLink,
    SenderLink,
    SenderPtr,
    TransportClient,
    TransportClientPtr,
    WireMessage,
    DEFAULT_PRIORITY,
};
