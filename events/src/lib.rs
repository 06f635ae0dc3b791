//! Event envelope shared by client connections and the distribution bus.
//!
//! This crate provides the data that flows through the realtime fan-out
//! subsystem, with no dependency on how it is transported.
//!
//! # Architecture
//!
//! - **Event**: Immutable envelope of `name`, `data` and `meta`
//! - **EventData**: Either a JSON object or a raw string payload
//! - **EventHandler**: Trait invoked once per inbound event from a client
//!
//! The canonical wire form is a JSON object with the fields in the order
//! `name`, `data`, `meta`. Decoding the wire form of an event always
//! reproduces an equal event.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod error;

pub use error::{Error, EventErrorKind};

/// A type alias for the identifier of a logical end user.
/// Also used verbatim as the pub/sub channel name for that user.
pub type UserId = String;

/// Free-form side-channel data attached to an event.
pub type Meta = Map<String, Value>;

/// Payload of an event: a structured mapping or a raw string.
/// Any other JSON type is rejected when decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventData {
    Object(Map<String, Value>),
    Text(String),
}

impl From<&str> for EventData {
    fn from(text: &str) -> Self {
        EventData::Text(text.to_string())
    }
}

impl From<String> for EventData {
    fn from(text: String) -> Self {
        EventData::Text(text)
    }
}

impl From<Map<String, Value>> for EventData {
    fn from(object: Map<String, Value>) -> Self {
        EventData::Object(object)
    }
}

/// Immutable event envelope. Fields are private; build one with
/// [`Event::new`] or [`Event::with_meta`], or decode it from the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    name: String,
    data: EventData,
    #[serde(default)]
    meta: Meta,
}

impl Event {
    pub fn new(name: impl Into<String>, data: impl Into<EventData>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
            meta: Meta::new(),
        }
    }

    pub fn with_meta(name: impl Into<String>, data: impl Into<EventData>, meta: Meta) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
            meta,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &EventData {
        &self.data
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// Serialize to the canonical JSON text sent to clients and over the bus.
    pub fn to_wire(&self) -> Result<String, Error> {
        serde_json::to_string(self).map_err(Error::encode)
    }

    /// Decode an event from its JSON text form.
    pub fn from_wire(text: &str) -> Result<Self, Error> {
        serde_json::from_str(text).map_err(Error::malformed)
    }
}

/// Handler for events arriving from a client connection.
/// Invoked once per inbound event; the receive loop awaits completion
/// before reading the next message from the same connection.
/// Implementations own their failure handling.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, user_id: &UserId, event: Event);
}
