//! At-most-once request/response exchange over ACK messages.
//!
//! A [`RequestProcessor`] per ACK payload type hands out idempotency keys,
//! resends unanswered requests, and answers every request key once no
//! matter how often the peer repeats it. Handled keys are tracked in an
//! [`IntervalSet`].

pub mod config;
pub mod error;
pub mod keys;
pub mod outbox;
pub mod processor;

pub use config::{KeyExhaustion, ProcessorConfig};
pub use error::{AckError, Result};
pub use keys::{IntervalSet, KeyRange};
pub use outbox::Outbox;
pub use processor::{AckService, RejectRequests, RequestProcessor};
