//! Message types for the event consumer.

use std::fmt;

use dataset_indexer_shared::{CatalogRecord, RecordError, RecordRef};

/// Kind of catalog event, one per queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A record was created.
    Create,
    /// A record was updated.
    Update,
    /// A record was deleted.
    Delete,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [Self::Create, Self::Update, Self::Delete];

    /// Routing key the event is published with.
    pub fn routing_key(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.routing_key())
    }
}

/// A delivery as received from the broker, before parsing.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Which queue the message came from.
    pub kind: EventKind,
    /// Broker delivery tag used to settle the message.
    pub delivery_tag: u64,
    /// Raw message body.
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(kind: EventKind, delivery_tag: u64, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            delivery_tag,
            payload: payload.into(),
        }
    }
}

/// A parsed catalog event.
#[derive(Debug, Clone)]
pub struct RecordEvent {
    pub kind: EventKind,
    pub record: RecordRef,
    pub raw: CatalogRecord,
}

impl RecordEvent {
    /// Parse the body of an inbound message.
    pub fn parse(message: &InboundMessage) -> Result<Self, RecordError> {
        let raw = CatalogRecord::from_slice(&message.payload)?;
        let record = raw.record_ref()?;
        Ok(Self {
            kind: message.kind,
            record,
            raw,
        })
    }
}

/// Terminal outcome of handling one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Processing finished; remove the message from the queue.
    Ack,
    /// Processing failed transiently; return the message to the queue.
    NackRequeue,
    /// The message can never be processed; discard it.
    NackDrop,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::NackRequeue => "nack_requeue",
            Self::NackDrop => "nack_drop",
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
