//! Consumer module for the dataset indexer.
//!
//! Receives catalog events from the broker and resolves each one to a
//! [`Disposition`].

mod amqp_consumer;
mod handler;
mod messages;

pub use amqp_consumer::{
    AmqpConsumer, AmqpSettings, DEFAULT_QUEUE_PREFIX, DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY,
    DEFAULT_SUFFIXED_QUEUE_EXPIRY,
};
pub use handler::EventHandler;
pub use messages::{Disposition, EventKind, InboundMessage, RecordEvent};
