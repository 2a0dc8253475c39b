//! Transport seam under the signal client.
//!
//! A connector opens a socket and reports everything that happens on it as
//! [`SocketEvent`]s on the channel it is handed. `open` returns at once; the
//! handshake outcome arrives later as `Connected` or `Error`.

use std::sync::Arc;

use tokio::sync::mpsc;
use url::Url;

use crate::error::SignalResult;

/// What a socket reports upward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// Handshake completed.
    Connected,
    /// One binary (or text) frame from the server.
    Frame(Vec<u8>),
    /// The connection closed after it was established, or was closed locally.
    Closed,
    /// The connection could not be established. `http_status` is the handshake
    /// response status when the server answered at all.
    Error { http_status: Option<u16> },
}

/// An open (or opening) socket.
pub trait SignalSocket: Send + Sync {
    /// Queue one frame for sending.
    fn send(&self, frame: Vec<u8>) -> SignalResult<()>;

    /// Start a close. Frames queued before the call still go out.
    fn close(&self);
}

/// Opens sockets. Must be called from within a Tokio runtime.
pub trait SignalConnector: Send + Sync + 'static {
    fn open(
        &self,
        url: &Url,
        token: &str,
        events: mpsc::UnboundedSender<SocketEvent>,
    ) -> SignalResult<Arc<dyn SignalSocket>>;
}
