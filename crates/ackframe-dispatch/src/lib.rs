//! Priority-tiered delivery of decoded messages.
//!
//! Observers see messages without consuming them; handlers may consume a
//! message, which stops delivery to everything after them.

pub mod dispatcher;
pub mod handler;
pub mod priority;

pub use dispatcher::Dispatcher;
pub use handler::{Filter, Filtered, Guarded, Handler, Observer};
pub use priority::Priority;
