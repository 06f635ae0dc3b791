use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::*;
use realtime::transport::{MessageSink, MessageStream};
use realtime::BoxError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Outbound half of an upgraded WebSocket.
pub struct WebSocketSink {
    sink: Mutex<SplitSink<WebSocket, Message>>,
    closed: Arc<AtomicBool>,
}

/// Inbound half of an upgraded WebSocket.
pub struct WebSocketStream {
    stream: SplitStream<WebSocket>,
    closed: Arc<AtomicBool>,
}

/// Split an upgraded socket into the two transport halves.
pub fn split(socket: WebSocket) -> (Arc<WebSocketSink>, WebSocketStream) {
    let (sink, stream) = socket.split();
    let closed = Arc::new(AtomicBool::new(false));

    (
        Arc::new(WebSocketSink {
            sink: Mutex::new(sink),
            closed: Arc::clone(&closed),
        }),
        WebSocketStream { stream, closed },
    )
}

#[async_trait]
impl MessageSink for WebSocketSink {
    async fn send_message(&self, text: &str) -> Result<(), BoxError> {
        if self.is_closed() {
            return Err("websocket is closed".into());
        }

        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text.into())).await.map_err(|e| {
            self.closed.store(true, Ordering::SeqCst);
            BoxError::from(e)
        })
    }

    async fn close(&self) -> Result<(), BoxError> {
        self.closed.store(true, Ordering::SeqCst);

        let mut sink = self.sink.lock().await;
        sink.send(Message::Close(None)).await?;
        sink.close().await?;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageStream for WebSocketStream {
    async fn receive_message(&mut self) -> Option<Result<String, BoxError>> {
        loop {
            let message = match self.stream.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    self.closed.store(true, Ordering::SeqCst);
                    return Some(Err(BoxError::from(e)));
                }
                None => {
                    self.closed.store(true, Ordering::SeqCst);
                    return None;
                }
            };

            match message {
                Message::Text(text) => return Some(Ok(text.as_str().to_owned())),
                Message::Binary(bytes) => {
                    return Some(String::from_utf8(bytes.to_vec()).map_err(BoxError::from));
                }
                Message::Close(frame) => {
                    trace!("Peer closed websocket: {frame:?}");
                    self.closed.store(true, Ordering::SeqCst);
                    return None;
                }
                // Pings are answered by axum
                Message::Ping(_) | Message::Pong(_) => continue,
            }
        }
    }
}
