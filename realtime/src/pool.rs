use crate::connection::{Connection, ConnectionHandle, ConnectionId};
use crate::transport::{MessageSink, MessageStream};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use events::{EventHandler, UserId};
use log::*;
use std::collections::HashMap;
use std::sync::Arc;

/// The live connections of one user within this process.
///
/// Pools handed out by [`ConnectionPools::lookup`] are snapshots: they can
/// be broadcast to without holding any registry lock.
#[derive(Clone)]
pub struct ConnectionPool {
    user_id: UserId,
    connections: HashMap<ConnectionId, ConnectionHandle>,
}

impl ConnectionPool {
    fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            connections: HashMap::new(),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.connections.contains_key(connection_id)
    }

    /// Deliver already-serialized event text to every connection.
    ///
    /// Only enqueues on each connection's outbound queue, so a stalled or
    /// failed peer affects nothing but its own delivery.
    pub fn broadcast(&self, text: &str) {
        trace!(
            "Broadcasting to {} connection(s) of user {}",
            self.connections.len(),
            self.user_id
        );
        for handle in self.connections.values() {
            handle.send(text);
        }
    }
}

/// Process-wide registry of connection pools keyed by user.
///
/// A pool is registered if and only if it holds at least one connection.
/// Registration of a new pool together with its first connection, and
/// removal of the last connection together with its pool, each happen
/// under a single lock on the user's registry entry.
pub struct ConnectionPools {
    pools: DashMap<UserId, ConnectionPool>,
}

impl ConnectionPools {
    pub fn new() -> Self {
        Self {
            pools: DashMap::new(),
        }
    }

    /// Register a new connection for `user_id`, creating the user's pool
    /// when this is their first connection in this process.
    ///
    /// Returns the connection, whose receive loop the caller must drive,
    /// and whether a new pool was created. Must be called from within a
    /// Tokio runtime, which runs the connection's outbound writer.
    pub fn connect(
        self: &Arc<Self>,
        user_id: UserId,
        sink: Arc<dyn MessageSink>,
        stream: Box<dyn MessageStream>,
        on_event: Arc<dyn EventHandler>,
    ) -> (Connection, bool) {
        let (handle, writer) = ConnectionHandle::open(Arc::clone(&sink));

        let created = match self.pools.entry(user_id.clone()) {
            Entry::Occupied(mut entry) => {
                entry
                    .get_mut()
                    .connections
                    .insert(handle.id().clone(), handle.clone());
                false
            }
            Entry::Vacant(entry) => {
                let mut pool = ConnectionPool::new(user_id.clone());
                pool.connections.insert(handle.id().clone(), handle.clone());
                entry.insert(pool);
                true
            }
        };

        info!(
            "Registered connection {} for user {}{}",
            handle.id(),
            user_id,
            if created { " (user online)" } else { "" }
        );

        let connection = Connection::new(
            handle,
            sink,
            writer,
            user_id,
            stream,
            on_event,
            Arc::clone(self),
        );
        (connection, created)
    }

    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.pools
            .get(user_id)
            .is_some_and(|pool| !pool.is_empty())
    }

    /// Snapshot of the user's pool, if they have any connection here.
    pub fn lookup(&self, user_id: &UserId) -> Option<ConnectionPool> {
        self.pools.get(user_id).map(|pool| pool.clone())
    }

    /// Number of users with at least one connection in this process.
    pub fn online_users(&self) -> usize {
        self.pools.len()
    }

    /// Remove a connection; returns `true` when it was the user's last one,
    /// in which case the pool has been deregistered in the same step.
    pub(crate) fn remove_connection(&self, user_id: &UserId, connection_id: &ConnectionId) -> bool {
        match self.pools.entry(user_id.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get_mut().connections.remove(connection_id).is_none() {
                    return false;
                }
                info!("Unregistered connection {connection_id} for user {user_id}");

                if entry.get().is_empty() {
                    entry.remove();
                    info!("User {user_id} went offline");
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(_) => false,
        }
    }
}

impl Default for ConnectionPools {
    fn default() -> Self {
        Self::new()
    }
}
