use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use url::Url;

use super::{LinkEvent, Transport, TransportLink};
use crate::session::SessionError;

/// WebSocket implementation of the transport seam.
pub struct WebSocketTransport {
    url: Url,
}

impl WebSocketTransport {
    pub fn new(url: &str) -> Result<Self, SessionError> {
        let url = Url::parse(url).map_err(|err| SessionError::InvalidUrl {
            url: url.to_string(),
            reason: err.to_string(),
        })?;
        Ok(Self { url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn dial(&self) -> Result<TransportLink, SessionError> {
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|err| SessionError::Dial(err.to_string()))?;

        let (tx_out, rx_out) = mpsc::unbounded_channel::<String>();
        let (tx_in, rx_in) = mpsc::unbounded_channel::<LinkEvent>();

        let pump = tokio::spawn(async move {
            pump_websocket(ws_stream, rx_out, tx_in).await;
        });

        Ok(TransportLink::new(tx_out, rx_in, Some(pump)))
    }
}

/// Pump frames both ways until the peer hangs up or the owner drops the link.
async fn pump_websocket(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut rx_out: mpsc::UnboundedReceiver<String>,
    tx_in: mpsc::UnboundedSender<LinkEvent>,
) {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let send_task = tokio::spawn(async move {
        while let Some(text) = rx_out.recv().await {
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    loop {
        match ws_receiver.next().await {
            Some(Ok(Message::Text(text))) => {
                if tx_in.send(LinkEvent::Message(text)).is_err() {
                    break;
                }
            }
            Some(Ok(Message::Binary(data))) => {
                // The backend only speaks JSON text frames, but tolerate
                // binary-encoded UTF-8 rather than dropping the link.
                match String::from_utf8(data) {
                    Ok(text) => {
                        if tx_in.send(LinkEvent::Message(text)).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "dropping non-utf8 binary frame");
                    }
                }
            }
            Some(Ok(Message::Close(frame))) => {
                let normal = frame
                    .map(|frame| frame.code == CloseCode::Normal)
                    .unwrap_or(false);
                let _ = tx_in.send(LinkEvent::Closed { normal });
                break;
            }
            Some(Ok(_)) => {} // Ping/Pong handled by tungstenite
            Some(Err(err)) => {
                tracing::debug!(error = %err, "websocket receive error");
                let _ = tx_in.send(LinkEvent::Closed { normal: false });
                break;
            }
            None => {
                let _ = tx_in.send(LinkEvent::Closed { normal: false });
                break;
            }
        }
    }

    send_task.abort();
    let _ = send_task.await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_url() {
        assert!(matches!(
            WebSocketTransport::new("not a url"),
            Err(SessionError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn keeps_valid_ws_url() {
        let transport = WebSocketTransport::new("ws://localhost:8888/monitor").unwrap();
        assert_eq!(transport.url().scheme(), "ws");
    }
}
