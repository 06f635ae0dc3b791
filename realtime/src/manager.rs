use crate::bus::DistributionBus;
use crate::connection::Connection;
use crate::error::Error;
use crate::medium::PubSubMedium;
use crate::pool::ConnectionPools;
use crate::publisher::Publisher;
use crate::transport::{MessageSink, MessageStream};
use events::{EventHandler, UserId};
use futures_util::FutureExt;
use log::*;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Ties the local pools to the distribution bus for one process.
///
/// Every transition of a user from offline to online starts a bus
/// listener, and every transition back tears it down.
pub struct Manager {
    pools: Arc<ConnectionPools>,
    bus: Arc<DistributionBus>,
    publisher: Publisher,
}

impl Manager {
    pub fn new(medium: Arc<dyn PubSubMedium>) -> Self {
        let pools = Arc::new(ConnectionPools::new());
        Self {
            bus: Arc::new(DistributionBus::new(Arc::clone(&medium), Arc::clone(&pools))),
            publisher: Publisher::new(medium),
            pools,
        }
    }

    /// Register a freshly accepted transport for `user_id`.
    ///
    /// When this is the user's first connection in this process the bus
    /// starts listening on their channel; a later connection only restarts
    /// a listener that is no longer running. A subscribe failure is logged
    /// and the connection stays usable for inbound events.
    pub async fn connect(
        &self,
        user_id: UserId,
        sink: Arc<dyn MessageSink>,
        stream: Box<dyn MessageStream>,
        on_event: Arc<dyn EventHandler>,
    ) -> Connection {
        let (mut connection, created) = self.pools.connect(user_id, sink, stream, on_event);
        connection.attach_bus(Arc::clone(&self.bus));

        let user_id = connection.user_id().clone();
        if created || !self.bus.is_listening(&user_id).await {
            if let Err(e) = self.bus.ensure_listening(&user_id).await {
                error!(
                    "Failed to subscribe for user {user_id}, remote events will not be delivered: {e}"
                );
            }
        }

        connection
    }

    /// Drive the connection's receive loop, then disconnect it.
    ///
    /// Returns the loop outcome so the owner can see why it ended. A panic
    /// in the event handler ends the loop like any other error.
    pub async fn serve(&self, mut connection: Connection) -> Result<(), Error> {
        let result = match AssertUnwindSafe(connection.receive_loop())
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => Err(Error::handler_panic(panic_message(panic.as_ref()).into())),
        };
        if let Err(e) = &result {
            warn!("Connection {} ended with error: {e}", connection.id());
        }

        self.disconnect(&mut connection).await;
        result
    }

    /// Disconnect and, if the user just went offline here, tear down the
    /// bus listener.
    pub async fn disconnect(&self, connection: &mut Connection) {
        if connection.disconnect().await {
            let user_id = connection.user_id().clone();
            self.bus.teardown(&user_id).await;
        }
    }

    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.pools.is_online(user_id)
    }

    pub fn pools(&self) -> &Arc<ConnectionPools> {
        &self.pools
    }

    pub fn bus(&self) -> &DistributionBus {
        &self.bus
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub async fn shutdown(&self) {
        self.bus.shutdown().await;
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("event handler panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("event handler panicked: {message}")
    } else {
        "event handler panicked".to_string()
    }
}
