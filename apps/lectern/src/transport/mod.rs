use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::session::SessionError;

pub mod mock;
pub mod websocket;

pub use mock::{MockControl, MockLinkHandle, MockTransport};
pub use websocket::WebSocketTransport;

/// What a live link reports back to its owner.
#[derive(Debug)]
pub enum LinkEvent {
    /// A complete text frame from the peer.
    Message(String),
    /// The link is gone. `normal` distinguishes a clean close from a drop
    /// that should trigger reconnection.
    Closed { normal: bool },
}

/// Dialer seam over a full-duplex socket. The multiplexer owns exactly one
/// live link at a time regardless of how many subscribers it serves.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn dial(&self) -> Result<TransportLink, SessionError>;
}

/// One established connection: an outgoing sender plus an ordered stream of
/// inbound events. Dropping the link tears down any pump tasks behind it.
pub struct TransportLink {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<LinkEvent>,
    pump: Option<tokio::task::JoinHandle<()>>,
}

impl TransportLink {
    pub fn new(
        tx: mpsc::UnboundedSender<String>,
        rx: mpsc::UnboundedReceiver<LinkEvent>,
        pump: Option<tokio::task::JoinHandle<()>>,
    ) -> Self {
        Self { tx, rx, pump }
    }

    /// Queue a text frame. Returns false once the link is gone.
    pub fn send(&self, text: String) -> bool {
        self.tx.send(text).is_ok()
    }

    /// Clone of the outgoing sender, for callers that outlive the recv loop.
    pub fn sender(&self) -> mpsc::UnboundedSender<String> {
        self.tx.clone()
    }

    /// Next inbound event, in arrival order. `None` means the pump hung up
    /// without reporting a close; treat it as an abnormal drop.
    pub async fn next_event(&mut self) -> Option<LinkEvent> {
        self.rx.recv().await
    }
}

impl Drop for TransportLink {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}
