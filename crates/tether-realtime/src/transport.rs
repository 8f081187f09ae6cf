//! Connection transport seam.
//!
//! A [`Connector`] performs the opening handshake and yields a [`Link`]: an
//! open, text-framed, bidirectional channel. The connection manager owns
//! reconnection, heartbeats, and dispatch; a link only moves frames.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::ConnectionError;

/// Opens links.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Perform the handshake with `url`.
    async fn connect(&self, url: &str) -> Result<Box<dyn Link>, ConnectionError>;
}

/// An open text-framed channel.
///
/// `recv` must be cancel-safe: the manager polls it inside `select!`.
#[async_trait]
pub trait Link: Send {
    /// Write one text frame.
    async fn send(&mut self, text: String) -> Result<(), ConnectionError>;

    /// Read the next text frame. `None` means the peer closed the link.
    async fn recv(&mut self) -> Option<Result<String, ConnectionError>>;

    /// Close the link. Errors are ignored; the link is unusable afterwards.
    async fn close(&mut self);
}

// ─────────────────────────────────────────────────────────────────────────────
// tokio-tungstenite
// ─────────────────────────────────────────────────────────────────────────────

/// [`Connector`] for `ws://` URLs.
#[derive(Clone, Copy, Debug, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Link>, ConnectionError> {
        let (stream, response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| ConnectionError::Handshake(e.to_string()))?;
        debug!(url, status = response.status().as_u16(), "websocket handshake complete");
        Ok(Box::new(WsLink { stream }))
    }
}

/// [`Link`] over a tungstenite WebSocket stream.
pub struct WsLink {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl std::fmt::Debug for WsLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsLink").finish_non_exhaustive()
    }
}

#[async_trait]
impl Link for WsLink {
    async fn send(&mut self, text: String) -> Result<(), ConnectionError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, ConnectionError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(ConnectionError::Transport(e.to_string()))),
            };
            match message {
                Message::Text(text) => return Some(Ok(text.as_str().to_owned())),
                Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => debug!(len = data.len(), "ignoring non-UTF8 binary frame"),
                },
                Message::Close(frame) => {
                    debug!(?frame, "peer sent close frame");
                    return None;
                }
                // tungstenite answers pings itself
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
