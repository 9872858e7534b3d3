//! Per-address send and receive adapters.

mod consumer;
mod handler;
mod inbound;
mod producer;

pub use consumer::ConsumerEndpoint;
pub use inbound::InboundMessage;
pub use producer::ProducerEndpoint;
