use std::sync::mpsc;

use ackframe_frame::Message;

use crate::error::{AckError, Result};

/// Where a processor puts the messages it wants sent.
///
/// The processor never writes to a stream itself; the packet pump (or a
/// test) drains the outbox in submission order.
pub trait Outbox: Send + Sync {
    fn enqueue(&self, message: Box<dyn Message>) -> Result<()>;
}

impl Outbox for mpsc::Sender<Box<dyn Message>> {
    fn enqueue(&self, message: Box<dyn Message>) -> Result<()> {
        self.send(message).map_err(|_| AckError::Disconnected)
    }
}

impl Outbox for mpsc::SyncSender<Box<dyn Message>> {
    fn enqueue(&self, message: Box<dyn Message>) -> Result<()> {
        self.send(message).map_err(|_| AckError::Disconnected)
    }
}
