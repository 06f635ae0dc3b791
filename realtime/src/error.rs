//! Error types for the realtime fan-out subsystem.
use std::error::Error as StdError;
use std::fmt;

use events::{Error as EventError, EventErrorKind};

/// Boxed error raised by a transport or pub/sub medium implementation.
/// The core wraps it into an [`Error`] of the matching kind.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Realtime error type.
/// Only [`RealtimeErrorKind::Publish`] is ever returned to business logic;
/// every other kind is either returned to the collaborator owning the
/// transport (`MalformedEvent`, `TransportRead`, `HandlerPanic`) or logged
/// and swallowed by the component that produced it.
#[derive(Debug)]
pub struct Error {
    pub source: Option<BoxError>,
    pub error_kind: RealtimeErrorKind,
}

#[derive(Debug, PartialEq)]
pub enum RealtimeErrorKind {
    // Inbound payload could not be decoded into an event
    MalformedEvent,
    // Event could not be rendered to its wire form
    EncodeEvent,
    // Reading from a client transport failed
    TransportRead,
    // Writing to a client transport failed
    TransportWrite,
    // Closing a client transport failed
    TransportClose,
    // Connecting to the pub/sub medium failed
    MediumConnect,
    // Subscribing to a user channel failed
    Subscribe,
    // Unsubscribing or closing a subscription failed
    SubscriptionTeardown,
    // Publishing to the pub/sub medium failed
    Publish,
    // The inbound event handler panicked
    HandlerPanic,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "Realtime Error: {:?}: {source}", self.error_kind),
            None => write!(f, "Realtime Error: {:?}", self.error_kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl Error {
    fn with_source(error_kind: RealtimeErrorKind, source: BoxError) -> Self {
        Error {
            source: Some(source),
            error_kind,
        }
    }

    pub fn transport_read(source: BoxError) -> Self {
        Self::with_source(RealtimeErrorKind::TransportRead, source)
    }

    pub fn transport_write(source: BoxError) -> Self {
        Self::with_source(RealtimeErrorKind::TransportWrite, source)
    }

    pub fn transport_close(source: BoxError) -> Self {
        Self::with_source(RealtimeErrorKind::TransportClose, source)
    }

    pub fn medium_connect(source: BoxError) -> Self {
        Self::with_source(RealtimeErrorKind::MediumConnect, source)
    }

    pub fn subscribe(source: BoxError) -> Self {
        Self::with_source(RealtimeErrorKind::Subscribe, source)
    }

    pub fn subscription_teardown(source: BoxError) -> Self {
        Self::with_source(RealtimeErrorKind::SubscriptionTeardown, source)
    }

    pub fn publish(source: BoxError) -> Self {
        Self::with_source(RealtimeErrorKind::Publish, source)
    }

    pub fn handler_panic(source: BoxError) -> Self {
        Self::with_source(RealtimeErrorKind::HandlerPanic, source)
    }
}

// This is where codec errors from the `events` crate become realtime errors.
impl From<EventError> for Error {
    fn from(err: EventError) -> Self {
        let error_kind = match err.error_kind {
            EventErrorKind::Malformed => RealtimeErrorKind::MalformedEvent,
            EventErrorKind::Encode => RealtimeErrorKind::EncodeEvent,
        };

        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}
