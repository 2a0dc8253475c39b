use roomlink_peer::PeerError;
use roomlink_signal::SignalError;

/// Errors returned by the engine's public API. They only ever describe local
/// validation or an immediate send failure; connection outcomes are reported
/// through state changes.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Event queue is full")]
    QueueFull,

    #[error("Not connected")]
    NotConnected,

    #[error("Peer error: {0}")]
    Rtc(#[from] PeerError),

    #[error("Media error: {0}")]
    Media(String),

    #[error("Signal error: {0}")]
    Signal(#[from] SignalError),

    /// Only one remote audio track is subscribed at a time.
    #[error("Maximum number of subscriptions reached")]
    MaxSubscriptions,

    #[error("Engine is shutting down")]
    ShuttingDown,
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Errors from the RPC manager.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("RPC method already registered: {0}")]
    AlreadyRegistered(String),

    #[error("RPC method not registered: {0}")]
    NotRegistered(String),

    #[error("RPC payload too large: {size} bytes")]
    PayloadTooLarge { size: usize },

    #[error("Failed to send RPC packet: {0}")]
    SendFailed(String),

    /// Acks and responses for outbound calls are not handled yet.
    #[error("Outbound RPC is not supported")]
    NotSupported,

    #[error("Packet is not an RPC packet")]
    InvalidPacket,
}

pub type RpcResult<T> = Result<T, RpcError>;
