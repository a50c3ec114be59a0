use std::net::{SocketAddr, TcpListener, ToSocketAddrs};

use ackframe_frame::FrameConfig;

use crate::connector::TcpLink;
use crate::error::{PeerError, Result};

/// Listens for and accepts peer connections over TCP.
pub struct PeerListener {
    listener: TcpListener,
    frame_config: FrameConfig,
}

impl PeerListener {
    pub fn bind(addr: impl ToSocketAddrs + std::fmt::Display) -> Result<Self> {
        let listener = TcpListener::bind(&addr).map_err(|source| PeerError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        Ok(Self {
            listener,
            frame_config: FrameConfig::default(),
        })
    }

    /// Override the frame limits and timeouts applied to accepted links.
    pub fn with_frame_config(mut self, config: FrameConfig) -> Self {
        self.frame_config = config;
        self
    }

    /// Block until the next connection arrives.
    pub fn accept(&self) -> Result<TcpLink> {
        let (stream, addr) = self.listener.accept().map_err(PeerError::Accept)?;
        tracing::debug!(peer = %addr, "accepted connection");
        TcpLink::from_stream(stream, &self.frame_config)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(PeerError::Accept)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::connector::connect;

    #[test]
    fn accepted_link_gets_listener_config() {
        let listener = PeerListener::bind("127.0.0.1:0")
            .unwrap()
            .with_frame_config(FrameConfig {
                read_timeout: Some(Duration::from_millis(40)),
                ..FrameConfig::default()
            });
        let addr = listener.local_addr().unwrap();

        let client = thread::spawn(move || connect(addr, &FrameConfig::default()).unwrap());
        let link = listener.accept().unwrap();
        let client = client.join().unwrap();

        assert_eq!(link.peer_addr, client.writer.get_ref().local_addr().unwrap());
        assert_eq!(
            link.reader.get_ref().read_timeout().unwrap(),
            Some(Duration::from_millis(40))
        );
    }

    #[test]
    fn bind_conflict_is_reported() {
        let first = PeerListener::bind("127.0.0.1:0").unwrap();
        let addr = first.local_addr().unwrap();
        assert!(matches!(
            PeerListener::bind(addr),
            Err(PeerError::Bind { .. })
        ));
    }
}
