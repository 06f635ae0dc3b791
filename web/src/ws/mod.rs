//! WebSocket entry point for client connections.
//!
//! This module contains the Axum handler for the upgrade endpoint and the
//! adapter that exposes an upgraded socket through the transport boundary
//! of the `realtime` crate.

pub mod handler;
pub mod transport;
