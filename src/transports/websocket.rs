//! WebSocket transport over tokio-tungstenite

use std::time::Duration;

use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace};

use crate::config::DEFAULT_CLOSE_TIMEOUT;
use crate::transport::{Connection, Transport};
use crate::types::Endpoint;
use crate::{ClientError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Transport that opens one WebSocket per connection generation.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    close_timeout: Duration,
}

impl WebSocketTransport {
    /// Transport whose connections wait at most `close_timeout` when closing
    pub fn new(close_timeout: Duration) -> Self {
        Self { close_timeout }
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new(DEFAULT_CLOSE_TIMEOUT)
    }
}

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>> {
        debug!(%endpoint, "Opening WebSocket");

        let (stream, response) = connect_async(endpoint.as_str()).await.map_err(|e| {
            ClientError::transport_failed_with_source(
                format!("failed to connect to {endpoint}"),
                Box::new(e),
            )
        })?;

        debug!(%endpoint, status = %response.status(), "WebSocket handshake complete");

        Ok(Box::new(WebSocketConnection { stream, close_timeout: self.close_timeout }))
    }
}

/// One open WebSocket
pub struct WebSocketConnection {
    stream: WsStream,
    close_timeout: Duration,
}

#[async_trait::async_trait]
impl Connection for WebSocketConnection {
    async fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            let message = match self.stream.next().await {
                None => return Ok(None),
                Some(Ok(message)) => message,
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => return Ok(None),
                Some(Err(e)) => {
                    return Err(ClientError::transport_failed_with_source(
                        "WebSocket receive failed",
                        Box::new(e),
                    ));
                }
            };

            match message {
                Message::Text(text) => return Ok(Some(text.as_bytes().to_vec())),
                Message::Binary(bytes) => return Ok(Some(bytes.to_vec())),
                Message::Close(frame) => {
                    debug!(?frame, "Peer sent close frame");
                    return Ok(None);
                }
                // Control frames are answered by tungstenite itself
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {
                    trace!("Skipping control frame");
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        match tokio::time::timeout(self.close_timeout, self.stream.close(None)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => Ok(()),
            Ok(Err(e)) => Err(ClientError::transport_failed_with_source(
                "WebSocket close failed",
                Box::new(e),
            )),
            Err(_) => Err(ClientError::Timeout { duration: self.close_timeout }),
        }
    }
}
