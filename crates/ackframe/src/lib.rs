//! Typed, length-framed messages with at-most-once request/response
//! exchanges over unreliable byte streams.
//!
//! # Crate Structure
//!
//! - [`frame`]: tag/length framing, the message registry and the ACK envelope header
//! - [`dispatch`]: priority-tiered observers and handlers
//! - [`ack`]: idempotency keys, the interval key store and the request processor
//! - [`peer`]: threaded packet pump and TCP links (behind `peer` feature)
//! - [`messages`]: the message set spoken by the host and the firmware

pub mod messages;

/// Re-export frame types.
pub mod frame {
    pub use ackframe_frame::*;
}

/// Re-export dispatch types.
pub mod dispatch {
    pub use ackframe_dispatch::*;
}

/// Re-export ACK processor types.
pub mod ack {
    pub use ackframe_ack::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use ackframe_peer::*;
}
