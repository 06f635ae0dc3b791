//! Error types for the event codec
use std::error::Error as StdError;
use std::fmt;

/// Errors while decoding or encoding an [`crate::Event`].
#[derive(Debug)]
pub struct Error {
    // Underlying serde_json error, when there is one
    pub source: Option<serde_json::Error>,
    // Enum representing which category of error
    pub error_kind: EventErrorKind,
}

#[derive(Debug, PartialEq)]
pub enum EventErrorKind {
    // Inbound payload does not match the event schema
    Malformed,
    // Event could not be rendered to its wire form
    Encode,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "Event Error: {:?}: {source}", self.error_kind),
            None => write!(f, "Event Error: {:?}", self.error_kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

impl Error {
    pub(crate) fn malformed(source: serde_json::Error) -> Self {
        Error {
            source: Some(source),
            error_kind: EventErrorKind::Malformed,
        }
    }

    pub(crate) fn encode(source: serde_json::Error) -> Self {
        Error {
            source: Some(source),
            error_kind: EventErrorKind::Encode,
        }
    }
}
