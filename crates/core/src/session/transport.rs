//! The seam between the session and whatever carries its frames.
//!
//! A connector hands back a [`TransportHandle`]: a sender for outbound
//! frames and a receiver of lifecycle events. The connector's pump task
//! owns the other ends as a [`TransportPeer`]. Dropping the handle closes
//! the outbound channel, which is the pump's signal to shut the socket.

use crate::router::InboundFrame;
use async_trait::async_trait;
use bytes::Bytes;
use secrecy::SecretString;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Text(String),
    Binary(Bytes),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The handshake completed; frames may flow.
    Opened,
    Frame(InboundFrame),
    /// A transport failure. A `Closed` event (or the end of the channel) follows.
    Error(String),
    Closed,
}

/// The session's side of one live transport.
#[derive(Debug)]
pub struct TransportHandle {
    outbound: mpsc::Sender<OutboundFrame>,
    events: mpsc::Receiver<TransportEvent>,
}

/// The pump's side of one live transport.
#[derive(Debug)]
pub struct TransportPeer {
    pub outbound: mpsc::Receiver<OutboundFrame>,
    pub events: mpsc::Sender<TransportEvent>,
}

impl TransportHandle {
    /// Creates a connected handle/peer pair with `capacity` slots each way.
    pub fn channel(capacity: usize) -> (TransportHandle, TransportPeer) {
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        let (events_tx, events_rx) = mpsc::channel(capacity);
        (
            TransportHandle {
                outbound: outbound_tx,
                events: events_rx,
            },
            TransportPeer {
                outbound: outbound_rx,
                events: events_tx,
            },
        )
    }

    /// Queues a frame without waiting. Frames are dropped when the pump is
    /// backed up or gone; the stream is best effort.
    pub fn try_send(&self, frame: OutboundFrame) -> bool {
        self.outbound.try_send(frame).is_ok()
    }

    /// Next lifecycle event. `None` once the pump has gone away.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }
}

/// Opens transports to the agent endpoint.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(&self, credential: SecretString) -> anyhow::Result<TransportHandle>;
}
