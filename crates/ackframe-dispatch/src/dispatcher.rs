use std::sync::Arc;

use ackframe_frame::Message;

use crate::handler::{Filtered, Guarded, Handler, Observer};
use crate::priority::Priority;

#[derive(Default)]
struct Tier {
    observers: Vec<Arc<dyn Observer>>,
    handlers: Vec<Arc<dyn Handler>>,
}

/// Routes decoded messages through five priority tiers.
///
/// Registration takes `&mut self` and happens during setup. Once the
/// dispatcher is shared (`Arc<Dispatcher>`) it is read-only, so
/// [`dispatch`](Dispatcher::dispatch) takes no lock.
///
/// Delivery order for one message:
/// observers(Critical), handlers(Critical), observers(High), handlers(High),
/// ... down to handlers(Lowest). Observers of a tier therefore see a
/// message before that tier's handlers get a chance to consume it.
#[derive(Default)]
pub struct Dispatcher {
    tiers: [Tier; 5],
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_observer(&mut self, priority: Priority, observer: Arc<dyn Observer>) {
        self.tiers[priority.index()].observers.push(observer);
    }

    pub fn add_handler(&mut self, priority: Priority, handler: Arc<dyn Handler>) {
        self.tiers[priority.index()].handlers.push(handler);
    }

    /// Observe messages of type `T`.
    pub fn observe<T, F>(&mut self, priority: Priority, callback: F)
    where
        T: Message,
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.add_observer(priority, Arc::new(Filtered::<T, F>::new(callback)));
    }

    /// Observe every message.
    pub fn observe_all<F>(&mut self, priority: Priority, callback: F)
    where
        F: Fn(&dyn Message) + Send + Sync + 'static,
    {
        self.add_observer(
            priority,
            Arc::new(Filtered::<dyn Message, F>::new(callback)),
        );
    }

    /// Handle messages of type `T`. The closure returns whether it consumed the message.
    pub fn handle<T, F>(&mut self, priority: Priority, callback: F)
    where
        T: Message,
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.add_handler(priority, Arc::new(Filtered::<T, F>::new(callback)));
    }

    /// Offer every message to `callback`.
    pub fn handle_all<F>(&mut self, priority: Priority, callback: F)
    where
        F: Fn(&dyn Message) -> bool + Send + Sync + 'static,
    {
        self.add_handler(
            priority,
            Arc::new(Filtered::<dyn Message, F>::new(callback)),
        );
    }

    /// Handle messages for which `accept` returns true.
    pub fn handle_if<A, H>(&mut self, priority: Priority, accept: A, handle: H)
    where
        A: Fn(&dyn Message) -> bool + Send + Sync + 'static,
        H: Fn(&dyn Message) -> bool + Send + Sync + 'static,
    {
        self.add_handler(priority, Arc::new(Guarded::new(accept, handle)));
    }

    /// Deliver `message` and report whether a handler consumed it.
    pub fn dispatch(&self, message: &dyn Message) -> bool {
        for (tier, priority) in self.tiers.iter().zip(Priority::ALL) {
            for observer in &tier.observers {
                observer.notify(message);
            }

            for handler in &tier.handlers {
                if handler.can_accept(message) && handler.handle(message) {
                    tracing::trace!(message = message.name(), %priority, "message handled");
                    return true;
                }
            }
        }

        tracing::debug!(message = message.name(), "message not handled");
        false
    }

    pub fn observer_count(&self) -> usize {
        self.tiers.iter().map(|tier| tier.observers.len()).sum()
    }

    pub fn handler_count(&self) -> usize {
        self.tiers.iter().map(|tier| tier.handlers.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.observer_count() == 0 && self.handler_count() == 0
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("observers", &self.observer_count())
            .field("handlers", &self.handler_count())
            .finish()
    }
}
