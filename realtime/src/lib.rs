//! Realtime event fan-out across server processes.
//!
//! A user may hold several live connections (browser tabs, devices), and
//! those connections may be spread over several server processes. This
//! crate delivers an event published for a user to every one of them.
//!
//! # Architecture
//!
//! - **Per-user pools**: Each process keeps one pool per online user,
//!   registered in a `DashMap`. A pool exists exactly while it holds at
//!   least one connection.
//! - **One subscription per user per process**: The distribution bus
//!   subscribes to the user's channel on the shared medium when their pool
//!   is created and tears the subscription down when the pool goes away.
//!   A subscription that ends while the user is online is re-established.
//! - **Queued writes**: Each connection has a bounded outbound queue
//!   drained by its own writer task, so fan-out never waits on a peer.
//! - **Ephemeral messages**: Events for a user with no live connection are
//!   dropped. There is no replay.
//! - **Pluggable boundaries**: Client transports implement
//!   `MessageSink`/`MessageStream`; the shared medium implements
//!   `PubSubMedium` (Redis, or in-process for a single node and tests).
//!
//! # Message Flow
//!
//! 1. A collaborator accepts a transport and calls `Manager::connect`
//! 2. The connection joins its user's pool; a new pool starts a listener
//! 3. Business logic calls `Publisher::publish(user_id, event)`
//! 4. Every process listening on that user's channel receives the text
//! 5. Each listener broadcasts it to the connections in its local pool
//! 6. When the transport closes, `Manager::serve` disconnects it and, for
//!    the user's last connection, tears down the listener
//!
//! # Modules
//!
//! - `connection`: Connection, its receive loop, and type-safe ConnectionId
//! - `pool`: ConnectionPools registry and per-user ConnectionPool
//! - `bus`: DistributionBus listeners bridging the medium to the pools
//! - `publisher`: Publisher used by business logic
//! - `manager`: Wiring of pool transitions to bus transitions
//! - `medium`: Pub/sub boundary with Redis and in-process implementations
//! - `transport`: Client transport boundary with an in-process implementation

pub mod bus;
pub mod connection;
pub mod error;
pub mod manager;
pub mod medium;
pub mod pool;
pub mod publisher;
pub mod transport;

pub use connection::{Connection, ConnectionId};
pub use error::{BoxError, Error, RealtimeErrorKind};
pub use manager::Manager;
pub use pool::{ConnectionPool, ConnectionPools};
pub use publisher::Publisher;
