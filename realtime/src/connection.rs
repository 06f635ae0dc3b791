use crate::bus::DistributionBus;
use crate::error::Error;
use crate::pool::ConnectionPools;
use crate::transport::{MessageSink, MessageStream};
use events::{Event, EventHandler, UserId};
use log::*;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

/// Events queued for one connection beyond this are dropped for it.
pub const OUTBOUND_CAPACITY: usize = 256;

/// Upper bound on a graceful close of a client transport.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Unique identifier for a connection (server-generated)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outbound half of a connection, as held by its pool for fan-out.
///
/// Sending only enqueues; the transport is written by the connection's own
/// writer task, so a slow or stalled peer never holds up the caller.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: mpsc::Sender<String>,
}

impl ConnectionHandle {
    /// Create the handle and spawn the task draining its queue into `sink`.
    /// Must be called from within a Tokio runtime.
    pub(crate) fn open(sink: Arc<dyn MessageSink>) -> (Self, JoinHandle<()>) {
        let id = ConnectionId::new();
        let (outbound, queue) = mpsc::channel(OUTBOUND_CAPACITY);
        let writer = tokio::spawn(write_outbound(id.clone(), sink, queue));

        (Self { id, outbound }, writer)
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Best-effort write. A full queue or a stopped writer is logged and
    /// the event is dropped for this connection only.
    pub fn send(&self, text: &str) {
        match self.outbound.try_send(text.to_string()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("Outbound queue of connection {} is full, dropping event", self.id)
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Connection {} no longer accepts events, dropping event", self.id)
            }
        }
    }
}

async fn write_outbound(
    id: ConnectionId,
    sink: Arc<dyn MessageSink>,
    mut queue: mpsc::Receiver<String>,
) {
    while let Some(text) = queue.recv().await {
        if let Err(e) = sink.send_message(&text).await {
            let err = Error::transport_write(e);
            warn!(
                "Failed to send event to connection {id}: {err}. Further events are dropped until its receive loop ends."
            );
            break;
        }
    }
}

/// One live client transport belonging to one user.
///
/// The pool owns the outbound [`ConnectionHandle`]; the `Connection` itself
/// is held by the collaborator that accepted the transport and drives the
/// receive loop. It refers back to its pool only by user and connection id.
///
/// Dropping a connection that was never disconnected still deregisters it
/// and, when attached to a bus, schedules the user's teardown.
pub struct Connection {
    handle: ConnectionHandle,
    sink: Arc<dyn MessageSink>,
    writer: Option<JoinHandle<()>>,
    user_id: UserId,
    stream: Box<dyn MessageStream>,
    on_event: Arc<dyn EventHandler>,
    pools: Arc<ConnectionPools>,
    bus: Option<Arc<DistributionBus>>,
}

impl Connection {
    pub(crate) fn new(
        handle: ConnectionHandle,
        sink: Arc<dyn MessageSink>,
        writer: JoinHandle<()>,
        user_id: UserId,
        stream: Box<dyn MessageStream>,
        on_event: Arc<dyn EventHandler>,
        pools: Arc<ConnectionPools>,
    ) -> Self {
        Self {
            handle,
            sink,
            writer: Some(writer),
            user_id,
            stream,
            on_event,
            pools,
            bus: None,
        }
    }

    /// Bus to tear down through if this connection is dropped as the
    /// user's last one without an explicit disconnect.
    pub(crate) fn attach_bus(&mut self, bus: Arc<DistributionBus>) {
        self.bus = Some(bus);
    }

    pub fn id(&self) -> &ConnectionId {
        self.handle.id()
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Read inbound messages until the transport closes.
    ///
    /// Each message is decoded into an [`Event`] and handed to the event
    /// handler, which is awaited before the next read. Returns `Ok(())` when
    /// the peer closes; a malformed payload or a read failure ends the loop
    /// with an error so the owner can close the transport.
    pub async fn receive_loop(&mut self) -> Result<(), Error> {
        loop {
            let text = match self.stream.receive_message().await {
                Some(Ok(text)) => text,
                Some(Err(e)) => return Err(Error::transport_read(e)),
                None => {
                    debug!("Connection {} closed by transport", self.id());
                    return Ok(());
                }
            };

            let event = Event::from_wire(&text)?;
            trace!(
                "Connection {} received event {} for user {}",
                self.id(),
                event.name(),
                self.user_id
            );
            self.on_event.handle(&self.user_id, event).await;
        }
    }

    pub fn send(&self, text: &str) {
        self.handle.send(text);
    }

    /// Close the transport if still open and deregister from the pool.
    ///
    /// Safe to call more than once. Returns `true` only for the call that
    /// removed the user's last connection in this process.
    pub async fn disconnect(&mut self) -> bool {
        // A write stuck on the transport must not hold up the close
        if let Some(writer) = self.writer.take() {
            writer.abort();
            let _ = writer.await;
        }

        if !self.sink.is_closed() {
            match tokio::time::timeout(CLOSE_TIMEOUT, self.sink.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    let err = Error::transport_close(e);
                    error!("Socket closing error on connection {}: {err}", self.id());
                }
                Err(_) => warn!("Timed out closing connection {}", self.id()),
            }
        }

        self.pools.remove_connection(&self.user_id, self.id())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }

        if !self.pools.remove_connection(&self.user_id, self.id()) {
            return;
        }
        warn!(
            "Connection {} for user {} dropped without disconnect",
            self.id(),
            self.user_id
        );

        let Some(bus) = self.bus.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let user_id = self.user_id.clone();
                runtime.spawn(async move { bus.teardown(&user_id).await });
            }
            Err(_) => error!(
                "No runtime to tear down the subscription of user {}",
                self.user_id
            ),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", self.id())
            .field("user_id", &self.user_id)
            .finish()
    }
}
