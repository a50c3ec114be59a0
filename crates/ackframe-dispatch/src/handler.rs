use std::marker::PhantomData;

use ackframe_frame::Message;

/// Sees every dispatched message that reaches its tier. Never consumes.
pub trait Observer: Send + Sync {
    fn notify(&self, message: &dyn Message);
}

/// May consume a dispatched message.
pub trait Handler: Send + Sync {
    /// Whether this handler is interested in `message` at all.
    fn can_accept(&self, message: &dyn Message) -> bool;

    /// Process an accepted message. Returning `true` ends the dispatch.
    fn handle(&self, message: &dyn Message) -> bool;
}

/// Narrows a `&dyn Message` to the type a callback expects.
///
/// Implemented for every concrete message type (by downcast) and for
/// `dyn Message` itself, which lets every message through.
pub trait Filter: 'static {
    fn filter(message: &dyn Message) -> Option<&Self>;
}

impl<T: Message> Filter for T {
    fn filter(message: &dyn Message) -> Option<&Self> {
        message.downcast_ref::<T>()
    }
}

impl Filter for dyn Message {
    fn filter(message: &dyn Message) -> Option<&Self> {
        Some(message)
    }
}

/// A closure that only runs for messages of type `T`.
///
/// With `F: Fn(&T)` this is an [`Observer`]; with `F: Fn(&T) -> bool` it is a
/// [`Handler`] whose `can_accept` is the type check.
pub struct Filtered<T: ?Sized, F> {
    callback: F,
    _message: PhantomData<fn(&T)>,
}

impl<T: ?Sized + Filter, F> Filtered<T, F> {
    pub fn new(callback: F) -> Self {
        Self {
            callback,
            _message: PhantomData,
        }
    }
}

impl<T, F> Observer for Filtered<T, F>
where
    T: ?Sized + Filter,
    F: Fn(&T) + Send + Sync,
{
    fn notify(&self, message: &dyn Message) {
        if let Some(message) = T::filter(message) {
            (self.callback)(message);
        }
    }
}

impl<T, F> Handler for Filtered<T, F>
where
    T: ?Sized + Filter,
    F: Fn(&T) -> bool + Send + Sync,
{
    fn can_accept(&self, message: &dyn Message) -> bool {
        T::filter(message).is_some()
    }

    fn handle(&self, message: &dyn Message) -> bool {
        T::filter(message).is_some_and(|message| (self.callback)(message))
    }
}

/// A handler built from a separate acceptance predicate and handle closure.
pub struct Guarded<A, H> {
    accept: A,
    handle: H,
}

impl<A, H> Guarded<A, H>
where
    A: Fn(&dyn Message) -> bool + Send + Sync,
    H: Fn(&dyn Message) -> bool + Send + Sync,
{
    pub fn new(accept: A, handle: H) -> Self {
        Self { accept, handle }
    }
}

impl<A, H> Handler for Guarded<A, H>
where
    A: Fn(&dyn Message) -> bool + Send + Sync,
    H: Fn(&dyn Message) -> bool + Send + Sync,
{
    fn can_accept(&self, message: &dyn Message) -> bool {
        (self.accept)(message)
    }

    fn handle(&self, message: &dyn Message) -> bool {
        (self.handle)(message)
    }
}
