use std::net::SocketAddr;

/// Errors that can occur in peer operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] ackframe_frame::FrameError),

    /// Request processor error.
    #[error("ack error: {0}")]
    Ack(#[from] ackframe_ack::AckError),

    /// Could not bind the listening socket.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// Could not connect to the remote peer.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// Accepting a connection failed.
    #[error("accept failed: {0}")]
    Accept(std::io::Error),

    /// Socket setup error after the connection was established.
    #[error("socket error on {addr}: {source}")]
    Socket {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// Peer disconnected.
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// A pump thread panicked.
    #[error("{0} thread panicked")]
    ThreadPanicked(&'static str),
}

pub type Result<T> = std::result::Result<T, PeerError>;
