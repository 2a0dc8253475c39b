//! WebSocket socket built on `tokio-tungstenite`.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use roomlink_common::config::SignalConfig;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header::AUTHORIZATION};
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{SignalError, SignalResult};
use crate::socket::{SignalConnector, SignalSocket, SocketEvent};

/// Opens signal sockets over WebSocket with a bearer `Authorization` header.
#[derive(Debug, Clone, Default)]
pub struct WsConnector {
    config: SignalConfig,
}

impl WsConnector {
    pub fn new(config: SignalConfig) -> Self {
        Self { config }
    }
}

impl SignalConnector for WsConnector {
    fn open(
        &self,
        url: &Url,
        token: &str,
        events: mpsc::UnboundedSender<SocketEvent>,
    ) -> SignalResult<Arc<dyn SignalSocket>> {
        let mut request = url.as_str().into_client_request()?;
        let auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| SignalError::InvalidToken)?;
        request.headers_mut().insert(AUTHORIZATION, auth);

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_socket(request, self.config.clone(), events, commands_rx));

        Ok(Arc::new(WsSocket { commands: commands_tx }))
    }
}

enum Command {
    Send(Vec<u8>),
    Close,
}

struct WsSocket {
    commands: mpsc::UnboundedSender<Command>,
}

impl SignalSocket for WsSocket {
    fn send(&self, frame: Vec<u8>) -> SignalResult<()> {
        self.commands
            .send(Command::Send(frame))
            .map_err(|_| SignalError::Closed)
    }

    fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }
}

async fn run_socket(
    request: Request,
    config: SignalConfig,
    events: mpsc::UnboundedSender<SocketEvent>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let ws = match timeout(config.connect_timeout(), connect_async(request)).await {
        Ok(Ok((ws, _))) => ws,
        Ok(Err(e)) => {
            let http_status = match &e {
                tungstenite::Error::Http(response) => Some(response.status().as_u16()),
                _ => None,
            };
            warn!(error = %e, status = ?http_status, "Signal socket failed to connect");
            let _ = events.send(SocketEvent::Error { http_status });
            return;
        }
        Err(_) => {
            warn!(timeout_ms = config.connect_timeout_ms, "Signal socket connect timed out");
            let _ = events.send(SocketEvent::Error { http_status: None });
            return;
        }
    };
    info!("Signal socket connected");
    let _ = events.send(SocketEvent::Connected);

    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send(frame)) => {
                    if let Err(e) = sink.send(Message::binary(frame)).await {
                        warn!(error = %e, "Signal socket send failed");
                        break;
                    }
                }
                Some(Command::Close) | None => {
                    if timeout(config.close_timeout(), sink.close()).await.is_err() {
                        debug!("Signal socket close handshake timed out");
                    }
                    break;
                }
            },
            message = stream.next() => match message {
                Some(Ok(Message::Binary(data))) => {
                    let _ = events.send(SocketEvent::Frame(data.to_vec()));
                }
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(SocketEvent::Frame(text.as_bytes().to_vec()));
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "Signal socket closed by server");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "Signal socket read failed");
                    break;
                }
                None => break,
            },
        }
    }

    let _ = events.send(SocketEvent::Closed);
}
