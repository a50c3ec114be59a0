use std::net::{SocketAddr, TcpStream, ToSocketAddrs};

use ackframe_frame::{FrameConfig, FrameReader, FrameWriter};

use crate::error::{PeerError, Result};

/// Both halves of one TCP connection, ready for a [`Pump`](crate::Pump).
pub struct TcpLink {
    pub reader: FrameReader<TcpStream>,
    pub writer: FrameWriter<TcpStream>,
    pub peer_addr: SocketAddr,
}

impl TcpLink {
    /// Split an established stream into a frame reader and writer.
    pub fn from_stream(stream: TcpStream, config: &FrameConfig) -> Result<Self> {
        let peer_addr = stream.peer_addr().map_err(PeerError::Accept)?;
        let socket_err = |source| PeerError::Socket {
            addr: peer_addr,
            source,
        };

        stream.set_nodelay(true).map_err(socket_err)?;
        let reader_stream = stream.try_clone().map_err(socket_err)?;

        let reader = FrameReader::with_config_tcp(reader_stream, config.clone())?;
        let writer = FrameWriter::with_config_tcp(stream, config.clone())?;
        Ok(Self {
            reader,
            writer,
            peer_addr,
        })
    }
}

/// Connect to a listening peer.
pub fn connect(addr: impl ToSocketAddrs + std::fmt::Display, config: &FrameConfig) -> Result<TcpLink> {
    let stream = TcpStream::connect(&addr).map_err(|source| PeerError::Connect {
        addr: addr.to_string(),
        source,
    })?;
    let link = TcpLink::from_stream(stream, config)?;
    tracing::debug!(peer = %link.peer_addr, "connected");
    Ok(link)
}
