//! In-process pub/sub medium.
//!
//! Every clone shares the same channels, so several managers holding
//! clones of one `LocalMedium` behave like separate server processes
//! attached to the same broker.

use super::{PubSubMedium, Subscription};
use crate::error::BoxError;
use async_trait::async_trait;
use dashmap::DashMap;
use log::*;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct LocalMedium {
    channels: Arc<DashMap<String, broadcast::Sender<String>>>,
    capacity: usize,
}

impl LocalMedium {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// `capacity` bounds how many messages a slow subscriber may fall
    /// behind before it starts skipping.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            capacity,
        }
    }

    /// Number of live subscriptions on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map_or(0, |sender| sender.receiver_count())
    }

    /// Drop `channel`, ending every subscription on it once drained.
    pub fn close_channel(&self, channel: &str) {
        self.channels.remove(channel);
    }
}

impl Default for LocalMedium {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSubMedium for LocalMedium {
    async fn publish(&self, channel: &str, text: &str) -> Result<(), BoxError> {
        if let Some(sender) = self.channels.get(channel) {
            // No receivers is not an error: nobody is online for this channel
            let _ = sender.send(text.to_string());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, BoxError> {
        let receiver = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        Ok(Box::new(LocalSubscription {
            channel: channel.to_string(),
            receiver: Some(receiver),
            channels: Arc::clone(&self.channels),
        }))
    }
}

struct LocalSubscription {
    channel: String,
    receiver: Option<broadcast::Receiver<String>>,
    channels: Arc<DashMap<String, broadcast::Sender<String>>>,
}

#[async_trait]
impl Subscription for LocalSubscription {
    async fn next_message(&mut self) -> Option<Result<String, BoxError>> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(text) => return Some(Ok(text)),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        "Subscription to channel {} lagged, skipped {skipped} message(s)",
                        self.channel
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    async fn unsubscribe(&mut self) -> Result<(), BoxError> {
        self.receiver.take();
        self.channels
            .remove_if(&self.channel, |_, sender| sender.receiver_count() == 0);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BoxError> {
        self.unsubscribe().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_subscriber_receives_published_text() {
        let medium = LocalMedium::new();
        let mut first = medium.subscribe("42").await.unwrap();
        let mut second = medium.subscribe("42").await.unwrap();

        medium.publish("42", "hello").await.unwrap();

        assert_eq!(first.next_message().await.unwrap().unwrap(), "hello");
        assert_eq!(second.next_message().await.unwrap().unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_succeeds() {
        let medium = LocalMedium::new();

        medium.publish("nobody", "hello").await.unwrap();
        assert_eq!(medium.subscriber_count("nobody"), 0);
    }

    #[tokio::test]
    async fn test_channels_are_isolated() {
        let medium = LocalMedium::new();
        let mut other = medium.subscribe("2").await.unwrap();
        let mut mine = medium.subscribe("1").await.unwrap();

        medium.publish("1", "for one").await.unwrap();
        medium.publish("2", "for two").await.unwrap();

        assert_eq!(mine.next_message().await.unwrap().unwrap(), "for one");
        assert_eq!(other.next_message().await.unwrap().unwrap(), "for two");
    }

    #[tokio::test]
    async fn test_unsubscribe_releases_channel() {
        let medium = LocalMedium::new();
        let mut subscription = medium.subscribe("42").await.unwrap();
        assert_eq!(medium.subscriber_count("42"), 1);

        subscription.unsubscribe().await.unwrap();
        subscription.close().await.unwrap();

        assert_eq!(medium.subscriber_count("42"), 0);
        assert!(subscription.next_message().await.is_none());
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_to_newest_messages() {
        let medium = LocalMedium::with_capacity(2);
        let mut subscription = medium.subscribe("42").await.unwrap();

        for n in 0..5 {
            medium.publish("42", &n.to_string()).await.unwrap();
        }

        assert_eq!(subscription.next_message().await.unwrap().unwrap(), "3");
        assert_eq!(subscription.next_message().await.unwrap().unwrap(), "4");
    }

    #[tokio::test]
    async fn test_closed_channel_ends_subscription_after_drain() {
        let medium = LocalMedium::new();
        let mut subscription = medium.subscribe("42").await.unwrap();
        medium.publish("42", "last").await.unwrap();

        medium.close_channel("42");

        assert_eq!(subscription.next_message().await.unwrap().unwrap(), "last");
        assert!(subscription.next_message().await.is_none());
    }
}
