use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

use super::{LinkEvent, Transport, TransportLink};
use crate::protocol::EventMessage;
use crate::session::SessionError;

/// Script-driven in-memory transport for tests. Each successful dial hands the
/// controlling side a [`MockLinkHandle`] so the test can inject inbound frames,
/// observe outbound ones, and drop the link at will.
pub struct MockTransport {
    shared: Arc<MockShared>,
}

struct MockShared {
    fail_dials: AtomicUsize,
    dial_count: AtomicUsize,
    links_tx: mpsc::UnboundedSender<MockLinkHandle>,
}

/// Test-side controller paired with a [`MockTransport`].
pub struct MockControl {
    links_rx: mpsc::UnboundedReceiver<MockLinkHandle>,
    shared: Arc<MockShared>,
}

/// The peer end of one mock link.
pub struct MockLinkHandle {
    events: mpsc::UnboundedSender<LinkEvent>,
    outbound: mpsc::UnboundedReceiver<String>,
}

impl MockTransport {
    pub fn pair() -> (Self, MockControl) {
        let (links_tx, links_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(MockShared {
            fail_dials: AtomicUsize::new(0),
            dial_count: AtomicUsize::new(0),
            links_tx,
        });
        (
            Self {
                shared: shared.clone(),
            },
            MockControl { links_rx, shared },
        )
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn dial(&self) -> Result<TransportLink, SessionError> {
        self.shared.dial_count.fetch_add(1, Ordering::SeqCst);

        let remaining = self.shared.fail_dials.load(Ordering::SeqCst);
        if remaining > 0 {
            self.shared.fail_dials.store(remaining - 1, Ordering::SeqCst);
            return Err(SessionError::Dial("scripted dial failure".into()));
        }

        let (tx_out, rx_out) = mpsc::unbounded_channel::<String>();
        let (tx_in, rx_in) = mpsc::unbounded_channel::<LinkEvent>();

        let handle = MockLinkHandle {
            events: tx_in,
            outbound: rx_out,
        };
        let _ = self.shared.links_tx.send(handle);

        Ok(TransportLink::new(tx_out, rx_in, None))
    }
}

impl MockControl {
    /// Make the next `n` dials fail, for exercising the backoff path.
    pub fn fail_next_dials(&self, n: usize) {
        self.shared.fail_dials.store(n, Ordering::SeqCst);
    }

    /// Total dial attempts observed so far, successful or not.
    pub fn dial_count(&self) -> usize {
        self.shared.dial_count.load(Ordering::SeqCst)
    }

    /// Wait for the next established link.
    pub async fn next_link(&mut self) -> Option<MockLinkHandle> {
        self.links_rx.recv().await
    }
}

impl MockLinkHandle {
    /// Inject an inbound envelope, serialized the way the backend would.
    pub fn push_message(&self, message: &EventMessage) {
        let text = serde_json::to_string(message).expect("serialize event message");
        self.push_raw(text);
    }

    /// Inject a raw inbound frame, malformed payloads included.
    pub fn push_raw(&self, text: impl Into<String>) {
        let _ = self.events.send(LinkEvent::Message(text.into()));
    }

    /// Drop the link; `normal` mirrors the close-code distinction.
    pub fn close(&self, normal: bool) {
        let _ = self.events.send(LinkEvent::Closed { normal });
    }

    /// Next frame the client sent, if any.
    pub async fn next_outbound(&mut self) -> Option<String> {
        self.outbound.recv().await
    }

    pub fn try_next_outbound(&mut self) -> Option<String> {
        self.outbound.try_recv().ok()
    }
}
