//! Duplex text transports for roster channels.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::{GymError, GymResult};

/// One open connection. Dropping it closes the underlying socket.
#[async_trait]
pub trait RosterTransport: Send {
    async fn send_text(&mut self, text: String) -> GymResult<()>;

    /// Next text frame, or `None` once the peer has closed the connection.
    async fn recv_text(&mut self) -> Option<GymResult<String>>;

    async fn close(&mut self);
}

/// Opens a new [`RosterTransport`] per connection attempt.
#[async_trait]
pub trait RosterConnector: Send + Sync {
    async fn connect(&self, url: &str) -> GymResult<Box<dyn RosterTransport>>;
}

/// WebSocket connector backed by `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl RosterConnector for WsConnector {
    async fn connect(&self, url: &str) -> GymResult<Box<dyn RosterTransport>> {
        let (stream, response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| GymError::Transport(format!("Failed to connect to {url}: {e}")))?;

        tracing::debug!(url, status = response.status().as_u16(), "WebSocket handshake complete");
        Ok(Box::new(WsTransport { stream }))
    }
}

struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl RosterTransport for WsTransport {
    async fn send_text(&mut self, text: String) -> GymResult<()> {
        self.stream
            .send(Message::text(text))
            .await
            .map_err(|e| GymError::Transport(format!("Send failed: {e}")))
    }

    async fn recv_text(&mut self) -> Option<GymResult<String>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Binary(data)) => {
                    return Some(String::from_utf8(data.to_vec()).map_err(|_| {
                        GymError::Protocol("Binary frame is not valid UTF-8".to_string())
                    }));
                }
                Ok(Message::Close(frame)) => {
                    tracing::debug!(?frame, "Server closed the connection");
                    return None;
                }
                // ping/pong are answered by tungstenite itself
                Ok(_) => continue,
                Err(e) => return Some(Err(GymError::Transport(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(error = %e, "Error while closing WebSocket");
        }
    }
}
