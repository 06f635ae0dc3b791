//! Redis-backed pub/sub medium shared by every server process.

use super::{PubSubMedium, Subscription};
use crate::error::{BoxError, Error};
use async_trait::async_trait;
use futures_util::StreamExt;
use log::*;
use redis::aio::{ConnectionManager, PubSub};
use redis::AsyncCommands;

/// Publishes over one managed connection, which reconnects on its own
/// after the server drops it, and opens a dedicated pub/sub connection per
/// subscription.
#[derive(Clone)]
pub struct RedisMedium {
    client: redis::Client,
    connection: ConnectionManager,
}

impl RedisMedium {
    /// Connect to `url` and verify the server answers a PING.
    pub async fn connect(url: &str) -> Result<Self, Error> {
        let client = redis::Client::open(url).map_err(|e| Error::medium_connect(Box::new(e)))?;
        let mut connection = client
            .get_connection_manager()
            .await
            .map_err(|e| Error::medium_connect(Box::new(e)))?;

        let pong: String = redis::cmd("PING")
            .query_async(&mut connection)
            .await
            .map_err(|e| Error::medium_connect(Box::new(e)))?;
        debug!("Redis answered PING with {pong}");

        Ok(Self { client, connection })
    }
}

#[async_trait]
impl PubSubMedium for RedisMedium {
    async fn publish(&self, channel: &str, text: &str) -> Result<(), BoxError> {
        let mut connection = self.connection.clone();
        let receivers: i64 = connection.publish(channel, text).await?;
        trace!("Published to channel {channel}, {receivers} subscriber(s)");
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, BoxError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;

        Ok(Box::new(RedisSubscription {
            channel: channel.to_string(),
            pubsub: Some(pubsub),
        }))
    }
}

struct RedisSubscription {
    channel: String,
    pubsub: Option<PubSub>,
}

#[async_trait]
impl Subscription for RedisSubscription {
    async fn next_message(&mut self) -> Option<Result<String, BoxError>> {
        let pubsub = self.pubsub.as_mut()?;
        let mut messages = std::pin::pin!(pubsub.on_message());
        let message = messages.next().await?;
        Some(message.get_payload::<String>().map_err(BoxError::from))
    }

    async fn unsubscribe(&mut self) -> Result<(), BoxError> {
        if let Some(pubsub) = self.pubsub.as_mut() {
            pubsub.unsubscribe(&self.channel).await?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BoxError> {
        // Dropping the pub/sub connection closes it
        self.pubsub.take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RealtimeErrorKind;

    #[tokio::test]
    async fn test_invalid_url_is_a_connect_error() {
        let err = RedisMedium::connect("not a redis url").await.err().unwrap();

        assert_eq!(err.error_kind, RealtimeErrorKind::MediumConnect);
    }

    // Publishing must keep working after the server drops the connection.
    // Run with `REDIS_URL` pointing at a disposable server.
    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_publish_recovers_after_connection_is_killed() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
        let medium = RedisMedium::connect(&url).await.unwrap();
        let mut subscription = medium.subscribe("redis-medium-test").await.unwrap();

        // Pub/sub clients are not of type normal, so only publishers are killed
        let mut admin = medium.client.get_multiplexed_async_connection().await.unwrap();
        let _: redis::RedisResult<()> = redis::cmd("CLIENT")
            .arg(&["KILL", "TYPE", "normal", "SKIPME", "yes"])
            .query_async(&mut admin)
            .await;

        let mut published = false;
        for _ in 0..20 {
            if medium.publish("redis-medium-test", "after kill").await.is_ok() {
                published = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }

        assert!(published);
        assert_eq!(
            subscription.next_message().await.unwrap().unwrap(),
            "after kill"
        );
    }
}
