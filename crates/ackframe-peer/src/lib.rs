//! Connection plumbing for ackframe peers.
//!
//! A [`Pump`] runs one reader thread and one writer thread over a byte
//! stream. The reader decodes frames and hands them to a
//! [`Dispatcher`](ackframe_dispatch::Dispatcher); the writer drains an
//! [`OutgoingQueue`]. [`connect`] and [`PeerListener`] produce TCP links
//! ready to pump.

pub mod connector;
pub mod error;
pub mod listener;
pub mod pump;

pub use connector::{connect, TcpLink};
pub use error::{PeerError, Result};
pub use listener::PeerListener;
pub use pump::{Outgoing, OutgoingQueue, Pump, PumpConfig, PumpStats};
