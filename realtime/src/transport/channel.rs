//! In-process transport backed by tokio mpsc channels.
//!
//! Used for clients living in the same process (tests, internal workers)
//! and as the reference implementation of the transport boundary.

use super::{MessageSink, MessageStream};
use crate::error::BoxError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Server half used to write to the client.
#[derive(Debug)]
pub struct ChannelSink {
    outbound: mpsc::UnboundedSender<String>,
    closed: watch::Sender<bool>,
}

/// Server half used to read from the client.
#[derive(Debug)]
pub struct ChannelStream {
    inbound: mpsc::UnboundedReceiver<String>,
    closed: watch::Receiver<bool>,
}

/// The client side of an in-process transport.
/// Dropping `inbound` closes the transport from the client side.
#[derive(Debug)]
pub struct ClientEnd {
    pub inbound: mpsc::UnboundedSender<String>,
    pub outbound: mpsc::UnboundedReceiver<String>,
    closed: watch::Receiver<bool>,
}

impl ClientEnd {
    /// True once the server closed the transport.
    pub fn is_closed_by_server(&self) -> bool {
        *self.closed.borrow()
    }

    /// Send a raw text frame to the server.
    pub fn send(&self, text: impl Into<String>) -> bool {
        self.inbound.send(text.into()).is_ok()
    }

    /// Everything the server has written so far, without waiting.
    pub fn drain(&mut self) -> Vec<String> {
        let mut received = Vec::new();
        while let Ok(text) = self.outbound.try_recv() {
            received.push(text);
        }
        received
    }
}

/// Create a connected transport: the two server halves plus the client end.
pub fn pair() -> (Arc<ChannelSink>, ChannelStream, ClientEnd) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (closed_tx, closed_rx) = watch::channel(false);

    let sink = Arc::new(ChannelSink {
        outbound: outbound_tx,
        closed: closed_tx,
    });
    let stream = ChannelStream {
        inbound: inbound_rx,
        closed: closed_rx.clone(),
    };
    let client = ClientEnd {
        inbound: inbound_tx,
        outbound: outbound_rx,
        closed: closed_rx,
    };

    (sink, stream, client)
}

#[async_trait]
impl MessageSink for ChannelSink {
    async fn send_message(&self, text: &str) -> Result<(), BoxError> {
        if self.is_closed() {
            return Err("transport is closed".into());
        }
        self.outbound
            .send(text.to_string())
            .map_err(|_| BoxError::from("client hung up"))
    }

    async fn close(&self) -> Result<(), BoxError> {
        self.closed.send_replace(true);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow() || self.outbound.is_closed()
    }
}

#[async_trait]
impl MessageStream for ChannelStream {
    async fn receive_message(&mut self) -> Option<Result<String, BoxError>> {
        loop {
            let closed = *self.closed.borrow_and_update();
            if closed {
                return None;
            }

            tokio::select! {
                message = self.inbound.recv() => return message.map(Ok),
                changed = self.closed.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }
}
