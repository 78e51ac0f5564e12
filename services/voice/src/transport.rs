//! Websocket transport to the agent endpoint.
//!
//! Each connection gets its own pump task that shuttles frames between the
//! socket and the session's [`TransportPeer`]. The pump never interprets
//! frames; pings are answered by tungstenite itself.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use medvoice_core::router::InboundFrame;
use medvoice_core::session::{
    OutboundFrame, TransportConnector, TransportEvent, TransportHandle, TransportPeer,
};
use secrecy::{ExposeSecret, SecretString};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{WebSocketStream, connect_async};
use tracing::{Instrument, debug, info, warn};

/// Frames buffered in each direction between the session and the pump.
const TRANSPORT_BUFFER: usize = 256;

pub struct TungsteniteConnector {
    url: String,
}

impl TungsteniteConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl TransportConnector for TungsteniteConnector {
    async fn connect(&self, credential: SecretString) -> Result<TransportHandle> {
        let request = build_request(&self.url, &credential)?;
        let (ws_stream, _) = connect_async(request)
            .await
            .context("Failed to connect to agent websocket")?;
        info!(url = %self.url, "Connected to agent websocket");

        let (handle, peer) = TransportHandle::channel(TRANSPORT_BUFFER);
        let span = tracing::info_span!("agent_transport", url = %self.url);
        tokio::spawn(pump(ws_stream, peer).instrument(span));
        Ok(handle)
    }
}

/// The agent takes its token as a websocket subprotocol.
pub fn build_request(url: &str, credential: &SecretString) -> Result<Request> {
    let mut request = url
        .into_client_request()
        .with_context(|| format!("Invalid agent URL '{}'", url))?;
    request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        format!("token, {}", credential.expose_secret())
            .parse()
            .context("Credential is not a valid header value")?,
    );
    Ok(request)
}

async fn pump<S>(ws_stream: WebSocketStream<S>, peer: TransportPeer)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let TransportPeer {
        mut outbound,
        events,
    } = peer;
    let (mut socket_tx, mut socket_rx) = ws_stream.split();

    if events.send(TransportEvent::Opened).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = socket_tx.send(into_message(frame)).await {
                        warn!(error = %e, "Failed to write to agent websocket");
                        let _ = events.send(TransportEvent::Error(e.to_string())).await;
                        break;
                    }
                }
                None => {
                    debug!("Transport released by session, closing socket");
                    if let Err(e) = socket_tx.close().await {
                        debug!(error = %e, "Close handshake failed");
                    }
                    return;
                }
            },
            message = socket_rx.next() => {
                let frame = match message {
                    Some(Ok(Message::Text(text))) => InboundFrame::Text(text),
                    Some(Ok(Message::Binary(data))) => InboundFrame::Binary(Bytes::from(data)),
                    Some(Ok(Message::Close(close))) => {
                        info!(?close, "Agent closed the websocket");
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!(error = %e, "Agent websocket failed");
                        let _ = events.send(TransportEvent::Error(e.to_string())).await;
                        break;
                    }
                    None => break,
                };
                if events.send(TransportEvent::Frame(frame)).await.is_err() {
                    return;
                }
            }
        }
    }

    let _ = events.send(TransportEvent::Closed).await;
}

fn into_message(frame: OutboundFrame) -> Message {
    match frame {
        OutboundFrame::Text(text) => Message::Text(text),
        OutboundFrame::Binary(data) => Message::Binary(data.to_vec()),
    }
}
