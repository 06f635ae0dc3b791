//! Boundary between the fan-out core and a physical client transport.
//!
//! A transport is split in two halves so that outbound fan-out and the
//! inbound receive loop never contend for the same handle:
//!
//! - [`MessageSink`] is shared by the connection and its pool entry and is
//!   used for best-effort writes and closing.
//! - [`MessageStream`] is owned exclusively by the connection's receive loop.

use crate::error::BoxError;
use async_trait::async_trait;

pub mod channel;

#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Write one text message. Fails when the transport is closed or broken.
    async fn send_message(&self, text: &str) -> Result<(), BoxError>;

    /// Close the transport from the server side.
    async fn close(&self) -> Result<(), BoxError>;

    fn is_closed(&self) -> bool;
}

#[async_trait]
pub trait MessageStream: Send {
    /// Suspend until the next inbound text message.
    /// Returns `None` once the transport has been closed by either side.
    async fn receive_message(&mut self) -> Option<Result<String, BoxError>>;
}
