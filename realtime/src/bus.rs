//! Bridge between the shared pub/sub medium and this process's pools.
//!
//! Each user with a local pool has exactly one subscription to their
//! channel and one listening task forwarding what arrives on it to the
//! pool. Subscriptions follow pool transitions: started when a user's
//! first connection arrives, torn down when their last one leaves. A
//! subscription that ends while the user is still online is re-established
//! by its listener.

use crate::error::Error;
use crate::medium::{PubSubMedium, Subscription};
use crate::pool::ConnectionPools;
use dashmap::DashMap;
use events::UserId;
use log::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

/// First delay before retrying a subscription that failed or ended
/// without delivering anything.
pub const RESUBSCRIBE_DELAY_MIN: Duration = Duration::from_millis(50);
pub const RESUBSCRIBE_DELAY_MAX: Duration = Duration::from_secs(5);

struct Listener {
    cancel: oneshot::Sender<()>,
    // Yields the subscription it was reading from, if it still holds one
    task: JoinHandle<Option<Box<dyn Subscription>>>,
}

// A user's slot is locked across their subscribe and teardown steps, so
// those are serialized per user while other users proceed independently.
type Slot = Arc<Mutex<Option<Listener>>>;

pub struct DistributionBus {
    medium: Arc<dyn PubSubMedium>,
    pools: Arc<ConnectionPools>,
    listeners: DashMap<UserId, Slot>,
}

impl DistributionBus {
    pub fn new(medium: Arc<dyn PubSubMedium>, pools: Arc<ConnectionPools>) -> Self {
        Self {
            medium,
            pools,
            listeners: DashMap::new(),
        }
    }

    /// Subscribe to the user's channel and start forwarding to their pool,
    /// unless a listener is already running.
    ///
    /// Does nothing when the user is no longer online by the time their
    /// slot is acquired.
    pub async fn ensure_listening(&self, user_id: &UserId) -> Result<(), Error> {
        let slot = self.slot(user_id);
        let result = {
            let mut listener = slot.lock().await;
            self.start(user_id, &mut listener).await
        };

        drop(slot);
        self.prune(user_id);
        result
    }

    /// Stop the user's listener and release its subscription.
    ///
    /// Does nothing when the user has come back online by the time their
    /// slot is acquired. Failures while releasing the subscription are
    /// logged; the listener is always removed.
    pub async fn teardown(&self, user_id: &UserId) {
        let slot = self.slot(user_id);
        {
            let mut listener = slot.lock().await;
            if self.pools.is_online(user_id) {
                debug!("User {user_id} is online again, keeping subscription");
                return;
            }

            if let Some(listener) = listener.take() {
                Self::stop(user_id, listener).await;
                info!("Stopped listening on channel {user_id}");
            }
        }

        drop(slot);
        self.prune(user_id);
    }

    /// Stop every listener, used on process shutdown.
    pub async fn shutdown(&self) {
        for (user_id, slot) in self.slots() {
            let listener = slot.lock().await.take();
            if let Some(listener) = listener {
                Self::stop(&user_id, listener).await;
            }
        }
        self.listeners.clear();
        info!("Distribution bus shut down");
    }

    pub async fn is_listening(&self, user_id: &UserId) -> bool {
        let Some(slot) = self.listeners.get(user_id).map(|slot| Arc::clone(slot.value())) else {
            return false;
        };

        let listener = slot.lock().await;
        listener
            .as_ref()
            .is_some_and(|listener| !listener.task.is_finished())
    }

    pub async fn listener_count(&self) -> usize {
        let mut count = 0;
        for (_, slot) in self.slots() {
            if slot.lock().await.is_some() {
                count += 1;
            }
        }
        count
    }

    async fn start(&self, user_id: &UserId, listener: &mut Option<Listener>) -> Result<(), Error> {
        if let Some(running) = listener.as_ref() {
            if !running.task.is_finished() {
                trace!("Already listening for user {user_id}");
                return Ok(());
            }
        }
        if let Some(stale) = listener.take() {
            warn!("Listener for user {user_id} had stopped, replacing it");
            Self::stop(user_id, stale).await;
        }

        if !self.pools.is_online(user_id) {
            debug!("User {user_id} went offline before subscribing, skipping");
            return Ok(());
        }

        let subscription = self
            .medium
            .subscribe(user_id)
            .await
            .map_err(Error::subscribe)?;

        let (cancel, cancelled) = oneshot::channel();
        let task = tokio::spawn(listen(
            user_id.clone(),
            subscription,
            Arc::clone(&self.medium),
            Arc::clone(&self.pools),
            cancelled,
        ));
        *listener = Some(Listener { cancel, task });

        info!("Listening on channel {user_id}");
        Ok(())
    }

    fn slot(&self, user_id: &UserId) -> Slot {
        Arc::clone(self.listeners.entry(user_id.clone()).or_default().value())
    }

    fn slots(&self) -> Vec<(UserId, Slot)> {
        self.listeners
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    // Drop the user's slot once it is empty and nobody else holds it. The
    // caller must have released its own reference first.
    fn prune(&self, user_id: &UserId) {
        self.listeners.remove_if(user_id, |_, slot| {
            Arc::strong_count(slot) == 1
                && slot.try_lock().is_ok_and(|listener| listener.is_none())
        });
    }

    // Signal the task, wait until it has stopped, and only then release
    // the subscription it was reading from.
    async fn stop(user_id: &UserId, listener: Listener) {
        // The task may already have exited on its own
        let _ = listener.cancel.send(());

        match listener.task.await {
            Ok(Some(subscription)) => release(user_id, subscription).await,
            Ok(None) => {}
            Err(e) => error!("Listener for user {user_id} failed: {e}"),
        }
    }
}

async fn release(user_id: &UserId, mut subscription: Box<dyn Subscription>) {
    if let Err(e) = subscription.unsubscribe().await {
        let err = Error::subscription_teardown(e);
        error!("Error unsubscribing channel {user_id}: {err}");
    }
    if let Err(e) = subscription.close().await {
        let err = Error::subscription_teardown(e);
        error!("Error closing subscription for channel {user_id}: {err}");
    }
}

fn next_delay(delay: Duration) -> Duration {
    if delay.is_zero() {
        RESUBSCRIBE_DELAY_MIN
    } else {
        (delay * 2).min(RESUBSCRIBE_DELAY_MAX)
    }
}

async fn listen(
    user_id: UserId,
    mut subscription: Box<dyn Subscription>,
    medium: Arc<dyn PubSubMedium>,
    pools: Arc<ConnectionPools>,
    mut cancelled: oneshot::Receiver<()>,
) -> Option<Box<dyn Subscription>> {
    // Zero until a subscription ends without delivering anything
    let mut delay = Duration::ZERO;

    loop {
        loop {
            tokio::select! {
                biased;

                _ = &mut cancelled => return Some(subscription),
                message = subscription.next_message() => match message {
                    Some(Ok(text)) => {
                        delay = Duration::ZERO;
                        match pools.lookup(&user_id) {
                            Some(pool) => pool.broadcast(&text),
                            None => trace!("User {user_id} has no local pool, dropping message"),
                        }
                    }
                    Some(Err(e)) => warn!("Undecodable message on channel {user_id}: {e}"),
                    None => break,
                },
            }
        }

        release(&user_id, subscription).await;
        if !pools.is_online(&user_id) {
            debug!("Subscription to channel {user_id} ended with the user offline");
            return None;
        }
        warn!("Subscription to channel {user_id} ended, resubscribing");

        subscription = loop {
            tokio::select! {
                biased;

                _ = &mut cancelled => return None,
                _ = tokio::time::sleep(delay) => {}
            }
            delay = next_delay(delay);

            let attempt = tokio::select! {
                biased;

                _ = &mut cancelled => return None,
                attempt = medium.subscribe(&user_id) => attempt,
            };
            match attempt {
                Ok(subscription) => {
                    info!("Resubscribed to channel {user_id}");
                    break subscription;
                }
                Err(e) => {
                    let err = Error::subscribe(e);
                    error!("Resubscribing to channel {user_id} failed, retrying in {delay:?}: {err}");
                }
            }

            if !pools.is_online(&user_id) {
                return None;
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::medium::LocalMedium;
    use crate::transport::channel;
    use async_trait::async_trait;
    use events::{Event, EventHandler};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct NoopHandler;

    #[async_trait]
    impl EventHandler for NoopHandler {
        async fn handle(&self, _user_id: &UserId, _event: Event) {}
    }

    /// Wraps a LocalMedium and counts subscribe calls; optionally fails
    /// teardown to exercise error isolation.
    #[derive(Default)]
    struct CountingMedium {
        inner: LocalMedium,
        subscribes: Arc<AtomicUsize>,
        fail_teardown: bool,
    }

    struct FailingTeardown(Box<dyn Subscription>);

    #[async_trait]
    impl Subscription for FailingTeardown {
        async fn next_message(&mut self) -> Option<Result<String, BoxError>> {
            self.0.next_message().await
        }

        async fn unsubscribe(&mut self) -> Result<(), BoxError> {
            Err("connection reset".into())
        }

        async fn close(&mut self) -> Result<(), BoxError> {
            Err("connection reset".into())
        }
    }

    #[async_trait]
    impl PubSubMedium for CountingMedium {
        async fn publish(&self, channel: &str, text: &str) -> Result<(), BoxError> {
            self.inner.publish(channel, text).await
        }

        async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, BoxError> {
            self.subscribes.fetch_add(1, Ordering::SeqCst);
            let subscription = self.inner.subscribe(channel).await?;
            if self.fail_teardown {
                Ok(Box::new(FailingTeardown(subscription)))
            } else {
                Ok(subscription)
            }
        }
    }

    fn user(id: &str) -> UserId {
        id.to_string()
    }

    async fn wait_for(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_ensure_listening_is_idempotent() {
        let medium = Arc::new(CountingMedium::default());
        let pools = Arc::new(ConnectionPools::new());
        let bus = DistributionBus::new(medium.clone(), Arc::clone(&pools));
        let (sink, stream, _client) = channel::pair();
        let _connection = pools.connect(user("1"), sink, Box::new(stream), Arc::new(NoopHandler));

        bus.ensure_listening(&user("1")).await.unwrap();
        bus.ensure_listening(&user("1")).await.unwrap();

        assert_eq!(medium.subscribes.load(Ordering::SeqCst), 1);
        assert_eq!(medium.inner.subscriber_count("1"), 1);
        assert!(bus.is_listening(&user("1")).await);
    }

    #[tokio::test]
    async fn test_ensure_listening_skips_offline_user() {
        let medium = Arc::new(CountingMedium::default());
        let bus = DistributionBus::new(medium.clone(), Arc::new(ConnectionPools::new()));

        bus.ensure_listening(&user("1")).await.unwrap();

        assert_eq!(medium.subscribes.load(Ordering::SeqCst), 0);
        assert_eq!(bus.listener_count().await, 0);
    }

    #[tokio::test]
    async fn test_messages_are_forwarded_to_local_pool() {
        let medium = Arc::new(CountingMedium::default());
        let pools = Arc::new(ConnectionPools::new());
        let bus = DistributionBus::new(medium.clone(), Arc::clone(&pools));
        let (sink, stream, mut client) = channel::pair();
        let _connection = pools.connect(user("1"), sink, Box::new(stream), Arc::new(NoopHandler));
        bus.ensure_listening(&user("1")).await.unwrap();

        medium.publish("1", "raw text").await.unwrap();

        let received = client.outbound.recv().await.unwrap();
        assert_eq!(received, "raw text");
    }

    #[tokio::test]
    async fn test_teardown_releases_subscription_and_entry() {
        let medium = Arc::new(CountingMedium::default());
        let pools = Arc::new(ConnectionPools::new());
        let bus = DistributionBus::new(medium.clone(), Arc::clone(&pools));
        let (sink, stream, _client) = channel::pair();
        let (mut connection, _) =
            pools.connect(user("1"), sink, Box::new(stream), Arc::new(NoopHandler));
        bus.ensure_listening(&user("1")).await.unwrap();

        assert!(connection.disconnect().await);
        bus.teardown(&user("1")).await;

        assert_eq!(bus.listener_count().await, 0);
        assert_eq!(medium.inner.subscriber_count("1"), 0);
    }

    #[tokio::test]
    async fn test_teardown_keeps_subscription_when_user_is_back_online() {
        let medium = Arc::new(CountingMedium::default());
        let pools = Arc::new(ConnectionPools::new());
        let bus = DistributionBus::new(medium.clone(), Arc::clone(&pools));
        let (sink, stream, _client) = channel::pair();
        let _connection = pools.connect(user("1"), sink, Box::new(stream), Arc::new(NoopHandler));
        bus.ensure_listening(&user("1")).await.unwrap();

        bus.teardown(&user("1")).await;

        assert!(bus.is_listening(&user("1")).await);
    }

    #[tokio::test]
    async fn test_teardown_completes_when_release_fails() {
        let medium = Arc::new(CountingMedium {
            fail_teardown: true,
            ..Default::default()
        });
        let pools = Arc::new(ConnectionPools::new());
        let bus = DistributionBus::new(medium.clone(), Arc::clone(&pools));
        let (sink, stream, _client) = channel::pair();
        let (mut connection, _) =
            pools.connect(user("1"), sink, Box::new(stream), Arc::new(NoopHandler));
        bus.ensure_listening(&user("1")).await.unwrap();

        connection.disconnect().await;
        bus.teardown(&user("1")).await;

        assert_eq!(bus.listener_count().await, 0);
    }

    #[tokio::test]
    async fn test_message_for_torn_down_pool_is_dropped() {
        let medium = Arc::new(CountingMedium::default());
        let pools = Arc::new(ConnectionPools::new());
        let bus = DistributionBus::new(medium.clone(), Arc::clone(&pools));
        let (sink, stream, _client) = channel::pair();
        let (mut connection, _) =
            pools.connect(user("1"), sink, Box::new(stream), Arc::new(NoopHandler));
        bus.ensure_listening(&user("1")).await.unwrap();

        // Pool is gone but the listener has not been torn down yet
        assert!(connection.disconnect().await);
        medium.publish("1", "in flight").await.unwrap();
        tokio::task::yield_now().await;

        assert!(bus.is_listening(&user("1")).await);
        bus.teardown(&user("1")).await;
        assert_eq!(bus.listener_count().await, 0);
    }

    #[tokio::test]
    async fn test_ended_subscription_is_reestablished_while_online() {
        let medium = Arc::new(CountingMedium::default());
        let pools = Arc::new(ConnectionPools::new());
        let bus = DistributionBus::new(medium.clone(), Arc::clone(&pools));
        let (sink, stream, mut client) = channel::pair();
        let _connection = pools.connect(user("7"), sink, Box::new(stream), Arc::new(NoopHandler));
        bus.ensure_listening(&user("7")).await.unwrap();

        // Drop the channel out from under the listener so its stream ends
        medium.inner.close_channel("7");
        wait_for(|| {
            medium.subscribes.load(Ordering::SeqCst) == 2 && medium.inner.subscriber_count("7") == 1
        })
        .await;

        assert!(bus.is_listening(&user("7")).await);
        medium.publish("7", "after reconnect").await.unwrap();
        assert_eq!(client.outbound.recv().await.as_deref(), Some("after reconnect"));
    }

    #[tokio::test]
    async fn test_listener_stopped_while_offline_is_replaced() {
        let medium = Arc::new(CountingMedium::default());
        let pools = Arc::new(ConnectionPools::new());
        let bus = DistributionBus::new(medium.clone(), Arc::clone(&pools));
        let (sink, stream, _client) = channel::pair();
        let (mut gone, _) = pools.connect(user("1"), sink, Box::new(stream), Arc::new(NoopHandler));
        bus.ensure_listening(&user("1")).await.unwrap();

        // Pool emptied without a teardown, then the stream ends
        assert!(gone.disconnect().await);
        medium.inner.close_channel("1");
        let slot = Arc::clone(bus.listeners.get("1").unwrap().value());
        wait_for(|| {
            slot.try_lock()
                .map(|listener| listener.as_ref().is_some_and(|l| l.task.is_finished()))
                .unwrap_or(false)
        })
        .await;
        drop(slot);
        assert!(!bus.is_listening(&user("1")).await);

        let (sink, stream, _client) = channel::pair();
        let _back = pools.connect(user("1"), sink, Box::new(stream), Arc::new(NoopHandler));
        bus.ensure_listening(&user("1")).await.unwrap();

        assert_eq!(medium.subscribes.load(Ordering::SeqCst), 2);
        assert!(bus.is_listening(&user("1")).await);
        assert_eq!(bus.listener_count().await, 1);
    }

    #[tokio::test]
    async fn test_teardown_of_one_user_does_not_wait_on_another() {
        let medium = Arc::new(CountingMedium::default());
        let pools = Arc::new(ConnectionPools::new());
        let bus = Arc::new(DistributionBus::new(medium.clone(), Arc::clone(&pools)));
        let (sink, stream, _client) = channel::pair();
        let _one = pools.connect(user("1"), sink, Box::new(stream), Arc::new(NoopHandler));
        bus.ensure_listening(&user("1")).await.unwrap();

        // Hold user 1's slot as a slow teardown would
        let slot = bus.slot(&user("1"));
        let held = slot.lock().await;

        let (sink, stream, mut client) = channel::pair();
        let (mut two, _) = pools.connect(user("2"), sink, Box::new(stream), Arc::new(NoopHandler));
        tokio::time::timeout(Duration::from_secs(1), bus.ensure_listening(&user("2")))
            .await
            .expect("user 2 waited on user 1")
            .unwrap();
        medium.publish("2", "independent").await.unwrap();
        assert_eq!(client.outbound.recv().await.as_deref(), Some("independent"));

        two.disconnect().await;
        tokio::time::timeout(Duration::from_secs(1), bus.teardown(&user("2")))
            .await
            .expect("user 2 teardown waited on user 1");

        drop(held);
        drop(slot);
        assert!(bus.is_listening(&user("1")).await);
        assert_eq!(bus.listener_count().await, 1);
        assert!(!bus.listeners.contains_key("2"));
    }

    #[tokio::test]
    async fn test_shutdown_stops_every_listener() {
        let medium = Arc::new(CountingMedium::default());
        let pools = Arc::new(ConnectionPools::new());
        let bus = DistributionBus::new(medium.clone(), Arc::clone(&pools));
        let mut connections = Vec::new();
        for id in ["1", "2", "3"] {
            let (sink, stream, client) = channel::pair();
            let (connection, _) =
                pools.connect(user(id), sink, Box::new(stream), Arc::new(NoopHandler));
            bus.ensure_listening(&user(id)).await.unwrap();
            connections.push((connection, client));
        }

        bus.shutdown().await;

        assert_eq!(bus.listener_count().await, 0);
        for id in ["1", "2", "3"] {
            assert_eq!(medium.inner.subscriber_count(id), 0);
        }
        assert_eq!(pools.online_users(), 3);
    }
}
