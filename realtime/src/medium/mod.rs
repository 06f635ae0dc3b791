//! Boundary between the fan-out core and the shared publish/subscribe
//! medium that connects server processes.
//!
//! The channel for a user is the string form of their user id.

use crate::error::BoxError;
use async_trait::async_trait;

pub mod local;
pub mod redis;

pub use self::local::LocalMedium;
pub use self::redis::RedisMedium;

#[async_trait]
pub trait PubSubMedium: Send + Sync {
    /// Fire-and-forget publish of `text` on `channel`.
    async fn publish(&self, channel: &str, text: &str) -> Result<(), BoxError>;

    /// Open a new subscription to `channel`.
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, BoxError>;
}

#[async_trait]
pub trait Subscription: Send {
    /// Suspend until the next message arrives.
    ///
    /// Must be cancel safe: the listening task races it against its
    /// cancellation signal. `Some(Err(_))` reports a single undecodable
    /// message; `None` means the subscription has ended.
    async fn next_message(&mut self) -> Option<Result<String, BoxError>>;

    async fn unsubscribe(&mut self) -> Result<(), BoxError>;

    /// Release the underlying connection. Called after `unsubscribe`.
    async fn close(&mut self) -> Result<(), BoxError>;
}
