//! Transport seam.
//!
//! A [`Connector`] performs one handshake and hands back a [`Link`]: a pair
//! of channels detached from the socket. The production connector spawns a
//! pump task that shuttles text frames between the channels and a
//! `tokio-tungstenite` stream; tests plug in connectors that script the
//! remote end directly through a [`LinkPeer`].
//!
//! Dropping the `Link` (or its outbound sender) ends the pump, which sends a
//! close frame on the way out.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use wlmai_core::{ChatError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Something the remote end did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// One text frame.
    Frame(String),
    /// The transport ended, with the close reason or failure if known.
    Closed(Option<String>),
}

/// Local end of an established connection.
#[derive(Debug)]
pub struct Link {
    /// Frames to send.
    pub outbound: mpsc::Sender<String>,
    /// Frames and close notifications received.
    pub inbound: mpsc::Receiver<TransportEvent>,
}

/// Remote end of a [`Link`], driven by a pump task or a test.
#[derive(Debug)]
pub struct LinkPeer {
    /// Frames the local end sent.
    pub outbound: mpsc::Receiver<String>,
    /// Push frames or a close to the local end.
    pub inbound: mpsc::Sender<TransportEvent>,
}

impl Link {
    /// Create a connected `Link`/`LinkPeer` pair with `buffer` slots per
    /// direction.
    pub fn pair(buffer: usize) -> (Self, LinkPeer) {
        let (out_tx, out_rx) = mpsc::channel(buffer.max(1));
        let (in_tx, in_rx) = mpsc::channel(buffer.max(1));
        (
            Self {
                outbound: out_tx,
                inbound: in_rx,
            },
            LinkPeer {
                outbound: out_rx,
                inbound: in_tx,
            },
        )
    }
}

/// Opens transports.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Perform one handshake against `url`.
    ///
    /// Resolves once the transport is ready to carry frames.
    async fn connect(&self, url: &str, buffer: usize) -> Result<Link>;
}

/// WebSocket connector backed by `tokio-tungstenite`.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str, buffer: usize) -> Result<Link> {
        let (ws, response) = connect_async(url).await.map_err(handshake_error)?;
        debug!(status = %response.status(), "websocket handshake complete");

        let (link, peer) = Link::pair(buffer);
        drop(tokio::spawn(pump(ws, peer)));
        Ok(link)
    }
}

/// HTTP rejections of the upgrade keep their status so the caller can tell
/// an expired token from a flaky network.
fn handshake_error(err: tungstenite::Error) -> ChatError {
    match err {
        tungstenite::Error::Http(response) => ChatError::Http {
            status: response.status().as_u16(),
            message: "websocket upgrade rejected".into(),
        },
        other => ChatError::Transport(other.to_string()),
    }
}

async fn pump(ws: WsStream, mut peer: LinkPeer) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        tokio::select! {
            out = peer.outbound.recv() => {
                let Some(text) = out else {
                    // Local end dropped the link.
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                };
                if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                    warn!(error = %e, "websocket send failed");
                    let _ = peer.inbound.send(TransportEvent::Closed(Some(e.to_string()))).await;
                    break;
                }
            }
            msg = ws_rx.next() => {
                let event = match msg {
                    Some(Ok(Message::Text(text))) => TransportEvent::Frame(text.as_str().to_owned()),
                    Some(Ok(Message::Binary(data))) => {
                        if let Ok(text) = std::str::from_utf8(&data) {
                            TransportEvent::Frame(text.to_owned())
                        } else {
                            info!(len = data.len(), "ignoring non-UTF8 binary frame");
                            continue;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        TransportEvent::Closed(frame.map(|f| f.reason.as_str().to_owned()))
                    }
                    // Ping/pong are answered by tungstenite.
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => TransportEvent::Closed(Some(e.to_string())),
                    None => TransportEvent::Closed(None),
                };
                let closing = matches!(event, TransportEvent::Closed(_));
                if peer.inbound.send(event).await.is_err() || closing {
                    break;
                }
            }
        }
    }
    debug!("websocket pump stopped");
}
