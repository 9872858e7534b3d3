//! Domain layer public interface.
//!
//! This module defines the wire model and the transport collaborator
//! abstractions. Neither depends on a concrete AMQP engine or on the bus
//! representation.
//!
//! All domain consumers must import symbols via this module, not by
//! referencing individual files directly.

mod message;
mod transport;

// --- Wire model re-exports ---

pub use message::{
    //
    AmqpValue,
    Body,
    Header,
    MessageId,
    Properties,
    WireMessage,
    DEFAULT_PRIORITY,
};

// --- Transport domain re-exports ---

pub use transport::{
    //
    Address,
    ConnectOptions,
    Connection,
    Credentials,
    Delivery,
    Disposition,
    LinkSource,
    ReceiverLink,
    SenderLink,
    SenderPtr,
    TransportClient,
    TransportClientPtr,
};
