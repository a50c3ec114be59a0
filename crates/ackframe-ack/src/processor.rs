//! Requester and responder halves of the ACK exchange for one payload type.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use ackframe_dispatch::{Dispatcher, Handler, Priority};
use ackframe_frame::{Ack, AckPayload, DestinationCode, IdempotencyKey, Message};

use crate::config::{KeyExhaustion, ProcessorConfig};
use crate::error::{AckError, Result};
use crate::keys::IntervalSet;
use crate::outbox::Outbox;

/// Application callbacks of a [`RequestProcessor`].
pub trait AckService<P: AckPayload>: Send + Sync {
    /// Answer a request. `None` rejects it: nothing is sent, the key is not
    /// marked as handled and dispatch moves on to the next handler.
    fn on_request(&self, request: &Ack<P>) -> Option<P>;

    /// Inspect a response before it is handed to the waiter. Returning
    /// `false` leaves it for other handlers.
    fn on_response(&self, _response: &Ack<P>) -> bool {
        true
    }
}

impl<P, F> AckService<P> for F
where
    P: AckPayload,
    F: Fn(&Ack<P>) -> Option<P> + Send + Sync,
{
    fn on_request(&self, request: &Ack<P>) -> Option<P> {
        self(request)
    }
}

/// Service for processors that only send requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectRequests;

impl<P: AckPayload> AckService<P> for RejectRequests {
    fn on_request(&self, _request: &Ack<P>) -> Option<P> {
        None
    }
}

struct Stamped<P> {
    message: Ack<P>,
    at: Instant,
}

impl<P> Stamped<P> {
    fn now(message: Ack<P>) -> Self {
        Self {
            message,
            at: Instant::now(),
        }
    }
}

struct State<P> {
    next_key: u32,
    /// Requests we sent and have not collected a response for.
    requests: HashMap<u32, Stamped<P>>,
    /// Responses we sent, for answering repeated requests.
    responses: HashMap<u32, Stamped<P>>,
    /// Responses received and not yet taken by a waiter.
    received: HashMap<u32, Stamped<P>>,
    requester_keys: IntervalSet,
    responder_keys: IntervalSet,
    /// Request keys whose service call is running.
    in_progress: HashSet<u32>,
}

impl<P> State<P> {
    fn new() -> Self {
        Self {
            next_key: IdempotencyKey::MIN,
            requests: HashMap::new(),
            responses: HashMap::new(),
            received: HashMap::new(),
            requester_keys: IntervalSet::new(),
            responder_keys: IntervalSet::new(),
            in_progress: HashSet::new(),
        }
    }

    /// Returns the key and whether the key space wrapped to get it.
    fn allocate_key(&mut self, policy: KeyExhaustion) -> Result<(IdempotencyKey, bool)> {
        let wrapped = self.next_key > IdempotencyKey::MAX;
        if wrapped {
            match policy {
                KeyExhaustion::Fail => return Err(AckError::KeySpaceExhausted),
                KeyExhaustion::Wrap => {
                    tracing::warn!("idempotency keys exhausted, restarting at 1");
                    self.next_key = IdempotencyKey::MIN;
                    self.forget_keys();
                }
            }
        }
        let key = IdempotencyKey::new(self.next_key)?;
        self.next_key += 1;
        Ok((key, wrapped))
    }

    /// Start a new key epoch. Nothing recorded under an old key may leak
    /// into an exchange that reuses it. Running service calls keep their
    /// reservations.
    fn forget_keys(&mut self) {
        self.requests.clear();
        self.responses.clear();
        self.received.clear();
        self.requester_keys.clear();
        self.responder_keys.clear();
    }
}

/// What to do with a request whose key was already seen.
enum Repeat<P> {
    /// Another dispatch is still running the service for this key.
    Busy,
    Drop,
    Resend(Ack<P>),
    Reprocess,
}

/// Runs the ACK exchange for payload type `P`.
///
/// As a requester it hands out idempotency keys, remembers sent requests
/// and resends them until a response arrives. As a responder it answers
/// each key once through its [`AckService`] and deals with repeats of
/// handled keys according to [`ProcessorConfig`].
///
/// The processor is a dispatcher [`Handler`]; incoming messages reach it
/// through [`register`](RequestProcessor::register). Outgoing messages go
/// to its [`Outbox`].
pub struct RequestProcessor<P: AckPayload> {
    state: Mutex<State<P>>,
    ready: Condvar,
    outbox: Arc<dyn Outbox>,
    service: Box<dyn AckService<P>>,
    config: ProcessorConfig,
}

impl<P: AckPayload> RequestProcessor<P> {
    pub fn new(outbox: Arc<dyn Outbox>, service: impl AckService<P> + 'static) -> Self {
        Self::with_config(outbox, service, ProcessorConfig::default())
    }

    pub fn with_config(
        outbox: Arc<dyn Outbox>,
        service: impl AckService<P> + 'static,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            state: Mutex::new(State::new()),
            ready: Condvar::new(),
            outbox,
            service: Box::new(service),
            config,
        }
    }

    /// A processor that sends requests and rejects every incoming one.
    pub fn requester(outbox: Arc<dyn Outbox>, config: ProcessorConfig) -> Self {
        Self::with_config(outbox, RejectRequests, config)
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Register with `dispatcher` at [`Priority::Critical`].
    pub fn register(self: &Arc<Self>, dispatcher: &mut Dispatcher) {
        self.register_at(dispatcher, Priority::Critical);
    }

    pub fn register_at(self: &Arc<Self>, dispatcher: &mut Dispatcher, priority: Priority) {
        let handler: Arc<dyn Handler> = Arc::clone(self) as Arc<dyn Handler>;
        dispatcher.add_handler(priority, handler);
    }

    fn lock(&self) -> MutexGuard<'_, State<P>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send a request with a fresh key. Returns the key to wait on.
    pub fn send_request(&self, payload: P) -> Result<IdempotencyKey> {
        let (request, wrapped) = {
            let mut state = self.lock();
            let (key, wrapped) = state.allocate_key(self.config.key_exhaustion)?;
            let request = Ack::request(key, payload);
            state
                .requests
                .insert(key.get(), Stamped::now(request.clone()));
            (request, wrapped)
        };
        if wrapped {
            // Waiters on forgotten keys fail with `UnknownKey`.
            self.ready.notify_all();
        }

        let key = request.key();
        tracing::debug!(%key, "sending request");
        if let Err(err) = self.outbox.enqueue(Box::new(request)) {
            self.lock().requests.remove(&key.get());
            return Err(err);
        }
        Ok(key)
    }

    /// Block until the response for `key` arrives, resending the request
    /// every `resend_interval` when resending is enabled.
    pub fn await_response(&self, key: IdempotencyKey) -> Result<Ack<P>> {
        self.wait_for(key, None)
    }

    /// Like [`await_response`](Self::await_response), but gives up after `timeout`.
    ///
    /// On timeout the request stays pending and can be awaited again.
    pub fn await_response_timeout(&self, key: IdempotencyKey, timeout: Duration) -> Result<Ack<P>> {
        let deadline = Instant::now() + timeout;
        self.wait_for(key, Some(deadline))
            .map_err(|err| match err {
                AckError::Timeout(_) => AckError::Timeout(timeout),
                other => other,
            })
    }

    /// Send a request and wait for its response.
    pub fn request(&self, payload: P) -> Result<Ack<P>> {
        let key = self.send_request(payload)?;
        self.await_response(key)
    }

    /// Send a request and wait at most `timeout` for its response.
    pub fn request_timeout(&self, payload: P, timeout: Duration) -> Result<Ack<P>> {
        let key = self.send_request(payload)?;
        self.await_response_timeout(key, timeout)
    }

    fn wait_for(&self, key: IdempotencyKey, deadline: Option<Instant>) -> Result<Ack<P>> {
        let id = key.get();
        let mut state = self.lock();
        loop {
            if let Some(result) = state.received.remove(&id) {
                state.requests.remove(&id);
                return Ok(result.message);
            }

            let now = Instant::now();
            let resend_at = match state.requests.get_mut(&id) {
                None => return Err(AckError::UnknownKey(id)),
                Some(sent) if self.config.resend_packet => {
                    let due = sent.at + self.config.resend_interval;
                    if now >= due {
                        sent.at = now;
                        let again = sent.message.clone();
                        drop(state);
                        tracing::warn!(
                            %key,
                            interval = ?self.config.resend_interval,
                            "no response, resending request"
                        );
                        self.outbox.enqueue(Box::new(again))?;
                        state = self.lock();
                        continue;
                    }
                    Some(due)
                }
                Some(_) => None,
            };

            if deadline.is_some_and(|deadline| now >= deadline) {
                return Err(AckError::Timeout(Duration::ZERO));
            }

            let wake_at = match (resend_at, deadline) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            state = match wake_at {
                Some(at) => {
                    let (guard, _) = self
                        .ready
                        .wait_timeout(state, at.saturating_duration_since(now))
                        .unwrap_or_else(PoisonError::into_inner);
                    guard
                }
                None => self
                    .ready
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    /// Drop sent requests, cached responses and uncollected results older
    /// than `cache_expiry`. Returns the number of entries removed.
    ///
    /// Waiters on an evicted request wake up with [`AckError::UnknownKey`].
    pub fn update_cache(&self) -> usize {
        let expiry = self.config.cache_expiry;
        let now = Instant::now();
        let fresh = |entry: &Stamped<P>| now.saturating_duration_since(entry.at) < expiry;

        let removed = {
            let mut state = self.lock();
            let before = state.requests.len() + state.responses.len() + state.received.len();
            state.requests.retain(|_, entry| fresh(entry));
            state.responses.retain(|_, entry| fresh(entry));
            state.received.retain(|_, entry| fresh(entry));
            before - (state.requests.len() + state.responses.len() + state.received.len())
        };

        if removed > 0 {
            tracing::debug!(removed, "expired ACK cache entries");
            self.ready.notify_all();
        }
        removed
    }

    /// Requests sent and still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.lock().requests.len()
    }

    /// Responses kept for answering repeated requests.
    pub fn cached_responses(&self) -> usize {
        self.lock().responses.len()
    }

    fn on_request(&self, request: &Ack<P>) -> bool {
        let key = request.key();
        let id = key.get();

        // Checking the key and reserving it happen under one lock, so a
        // concurrent copy of the same request cannot run the service too.
        let repeated = {
            let mut state = self.lock();
            let repeated = if state.in_progress.contains(&id) {
                Some(Repeat::Busy)
            } else if state.responder_keys.has_key(id) {
                Some(self.classify_repeat(&mut state, id))
            } else {
                None
            };
            if matches!(repeated, None | Some(Repeat::Reprocess)) {
                state.in_progress.insert(id);
            }
            repeated
        };

        match repeated {
            Some(Repeat::Busy) => {
                tracing::debug!(%key, "request already being processed, dropping copy");
                return true;
            }
            Some(Repeat::Drop) => {
                tracing::debug!(%key, "dropping repeated request");
                return true;
            }
            Some(Repeat::Resend(response)) => {
                tracing::debug!(%key, "repeated request, resending cached response");
                self.enqueue(response);
                return true;
            }
            Some(Repeat::Reprocess) => {
                tracing::debug!(%key, "reprocessing repeated request");
            }
            None => {}
        }

        let Some(payload) = self.service.on_request(request) else {
            self.lock().in_progress.remove(&id);
            tracing::trace!(%key, "request rejected by service");
            return false;
        };

        let response = Ack::response(key, payload);
        {
            let mut state = self.lock();
            state.in_progress.remove(&id);
            state.responder_keys.put(id);
            if self.config.use_cache {
                state.responses.insert(id, Stamped::now(response.clone()));
            }
        }
        self.enqueue(response);
        true
    }

    fn classify_repeat(&self, state: &mut State<P>, id: u32) -> Repeat<P> {
        let config = &self.config;
        if config.discard_repeated {
            return Repeat::Drop;
        }

        if config.use_cache {
            let now = Instant::now();
            match state.responses.get_mut(&id) {
                Some(cached) => {
                    let age = now.saturating_duration_since(cached.at);
                    if age < config.ignore_repeat_window {
                        cached.at = now;
                        return Repeat::Resend(cached.message.clone());
                    }
                    if age >= config.key_timeout {
                        state.responses.remove(&id);
                        return Repeat::Reprocess;
                    }
                }
                // Evicted by `update_cache`, so older than `cache_expiry`.
                None => return Repeat::Reprocess,
            }
        }

        if config.allow_reprocess_repeated {
            Repeat::Reprocess
        } else {
            Repeat::Drop
        }
    }

    fn on_response(&self, response: &Ack<P>) -> bool {
        let key = response.key();
        let id = key.get();

        {
            let state = self.lock();
            if state.requester_keys.has_key(id) {
                tracing::debug!(%key, "dropping duplicate response");
                return true;
            }
            if !state.requests.contains_key(&id) {
                tracing::debug!(%key, "response does not match a pending request");
                return false;
            }
        }

        if !self.service.on_response(response) {
            return false;
        }

        {
            let mut state = self.lock();
            if !state.requester_keys.put(id) {
                return true;
            }
            state.received.insert(id, Stamped::now(response.clone()));
        }
        tracing::debug!(%key, "response received");
        self.ready.notify_all();
        true
    }

    fn enqueue(&self, message: Ack<P>) {
        let key = message.key();
        if let Err(err) = self.outbox.enqueue(Box::new(message)) {
            tracing::warn!(%key, error = %err, "failed to enqueue ACK message");
        }
    }

    #[cfg(test)]
    fn set_next_key(&self, next: u32) {
        self.lock().next_key = next;
    }
}

impl<P: AckPayload> Handler for RequestProcessor<P> {
    fn can_accept(&self, message: &dyn Message) -> bool {
        message.is::<Ack<P>>()
    }

    fn handle(&self, message: &dyn Message) -> bool {
        let Some(ack) = message.downcast_ref::<Ack<P>>() else {
            return false;
        };
        match ack.destination() {
            DestinationCode::ServerAck => self.on_request(ack),
            DestinationCode::ToClient => self.on_response(ack),
            // Only produced locally; a decoded frame never carries it.
            DestinationCode::ToServer => false,
        }
    }
}

impl<P: AckPayload> std::fmt::Debug for RequestProcessor<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestProcessor")
            .field("payload", &std::any::type_name::<P>())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    use ackframe_frame::{payload, Envelope, FrameError, Registry};
    use bytes::{BufMut, Bytes, BytesMut};

    use super::*;

    /// Request carries a number, response carries it doubled.
    #[derive(Debug, Clone, PartialEq)]
    struct Double(u32);

    impl AckPayload for Double {
        fn request_len(&self) -> usize {
            4
        }
        fn write_request(&self, dst: &mut BytesMut) -> ackframe_frame::Result<()> {
            dst.put_u32(self.0);
            Ok(())
        }
        fn read_request(src: &mut Bytes) -> ackframe_frame::Result<Self> {
            Ok(Self(payload::get_u32(src)?))
        }
        fn response_len(&self) -> usize {
            4
        }
        fn write_response(&self, dst: &mut BytesMut) -> ackframe_frame::Result<()> {
            dst.put_u32(self.0);
            Ok(())
        }
        fn read_response(src: &mut Bytes) -> ackframe_frame::Result<Self> {
            Ok(Self(payload::get_u32(src)?))
        }
    }

    type Outgoing = mpsc::Receiver<Box<dyn Message>>;

    fn outbox() -> (Arc<dyn Outbox>, Outgoing) {
        let (tx, rx) = mpsc::channel::<Box<dyn Message>>();
        (Arc::new(tx), rx)
    }

    fn key(k: u32) -> IdempotencyKey {
        IdempotencyKey::new(k).unwrap()
    }

    fn incoming_request(k: u32, n: u32) -> Ack<Double> {
        Ack::new(Envelope::new(key(k), DestinationCode::ServerAck), Double(n))
    }

    fn drain(rx: &Outgoing) -> Vec<Ack<Double>> {
        rx.try_iter()
            .map(|m| m.downcast_ref::<Ack<Double>>().unwrap().clone())
            .collect()
    }

    /// Responder that doubles and counts its calls.
    fn responder(config: ProcessorConfig) -> (RequestProcessor<Double>, Outgoing, Arc<AtomicUsize>) {
        let (tx, rx) = outbox();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let service = move |req: &Ack<Double>| {
            counter.fetch_add(1, Ordering::SeqCst);
            Some(Double(req.payload().0 * 2))
        };
        (
            RequestProcessor::with_config(tx, service, config),
            rx,
            calls,
        )
    }

    fn requester(config: ProcessorConfig) -> (RequestProcessor<Double>, Outgoing) {
        let (tx, rx) = outbox();
        (RequestProcessor::requester(tx, config), rx)
    }

    #[test]
    fn send_request_allocates_sequential_keys() {
        let (proc, rx) = requester(ProcessorConfig::default());
        assert_eq!(proc.send_request(Double(1)).unwrap(), key(1));
        assert_eq!(proc.send_request(Double(2)).unwrap(), key(2));

        let sent = drain(&rx);
        assert_eq!(sent.len(), 2);
        assert!(sent
            .iter()
            .all(|m| m.destination() == DestinationCode::ToServer));
        assert_eq!(sent[1].payload(), &Double(2));
        assert_eq!(proc.pending_requests(), 2);
    }

    #[test]
    fn new_request_is_answered_once() {
        let (proc, rx, calls) = responder(ProcessorConfig::default());

        assert!(proc.handle(&incoming_request(7, 21)));
        let sent = drain(&rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].key(), key(7));
        assert_eq!(sent[0].destination(), DestinationCode::ToClient);
        assert_eq!(sent[0].payload(), &Double(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(proc.cached_responses(), 1);
    }

    #[test]
    fn repeat_within_window_resends_cached_response() {
        let (proc, rx, calls) = responder(ProcessorConfig::default());

        assert!(proc.handle(&incoming_request(3, 5)));
        assert!(proc.handle(&incoming_request(3, 999)));

        let sent = drain(&rx);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], sent[1]);
        assert_eq!(sent[1].payload(), &Double(10));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let registry = Registry::builder()
            .register::<Ack<Double>>(4)
            .unwrap()
            .build();
        let first = registry.encode_to_vec(&sent[0]).unwrap();
        assert_eq!(registry.encode_to_vec(&sent[1]).unwrap(), first);
        // tag 4, length 8, key 3 to client, doubled payload 10
        assert_eq!(first, vec![4, 0, 8, 0, 0, 0, 26, 0, 0, 0, 10]);
    }

    #[test]
    fn concurrent_copies_of_one_request_run_the_service_once() {
        let (tx, rx) = outbox();
        let (entered_tx, entered) = mpsc::channel::<()>();
        let (release, release_rx) = mpsc::channel::<()>();
        let entered_tx = Mutex::new(entered_tx);
        let release_rx = Mutex::new(release_rx);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let proc = Arc::new(RequestProcessor::<Double>::new(
            tx,
            move |req: &Ack<Double>| {
                counter.fetch_add(1, Ordering::SeqCst);
                entered_tx.lock().unwrap().send(()).unwrap();
                release_rx.lock().unwrap().recv().unwrap();
                Some(Double(req.payload().0 * 2))
            },
        ));

        let first = {
            let proc = Arc::clone(&proc);
            std::thread::spawn(move || proc.handle(&incoming_request(5, 1)))
        };
        entered.recv_timeout(Duration::from_secs(5)).unwrap();

        // The copy arrives while the first dispatch is still in the service.
        assert!(proc.handle(&incoming_request(5, 1)));
        assert!(drain(&rx).is_empty());

        release.send(()).unwrap();
        assert!(first.join().unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let sent = drain(&rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload(), &Double(2));

        // Once answered, a later copy is served from cache.
        assert!(proc.handle(&incoming_request(5, 1)));
        assert_eq!(drain(&rx).len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rejected_request_releases_its_reservation() {
        let (tx, rx) = outbox();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let proc = RequestProcessor::<Double>::new(tx, move |req: &Ack<Double>| {
            // Reject the first attempt only.
            (counter.fetch_add(1, Ordering::SeqCst) > 0).then(|| Double(req.payload().0))
        });

        assert!(!proc.handle(&incoming_request(8, 4)));
        assert!(proc.handle(&incoming_request(8, 4)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(drain(&rx).len(), 1);
    }

    #[test]
    fn discard_repeated_drops_silently() {
        let config = ProcessorConfig {
            discard_repeated: true,
            ..ProcessorConfig::default()
        };
        let (proc, rx, calls) = responder(config);

        assert!(proc.handle(&incoming_request(1, 1)));
        assert!(proc.handle(&incoming_request(1, 1)));
        assert_eq!(drain(&rx).len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn repeat_past_key_timeout_is_reprocessed() {
        let config = ProcessorConfig {
            ignore_repeat_window: Duration::ZERO,
            key_timeout: Duration::ZERO,
            ..ProcessorConfig::default()
        };
        let (proc, rx, calls) = responder(config);

        assert!(proc.handle(&incoming_request(4, 1)));
        assert!(proc.handle(&incoming_request(4, 2)));

        let sent = drain(&rx);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].payload(), &Double(4));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn repeat_between_window_and_timeout_is_dropped() {
        let config = ProcessorConfig {
            ignore_repeat_window: Duration::ZERO,
            key_timeout: Duration::from_secs(3600),
            ..ProcessorConfig::default()
        };
        let (proc, rx, calls) = responder(config);

        assert!(proc.handle(&incoming_request(4, 1)));
        assert!(proc.handle(&incoming_request(4, 1)));
        assert_eq!(drain(&rx).len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn without_cache_repeat_is_dropped_unless_reprocess_allowed() {
        let config = ProcessorConfig {
            use_cache: false,
            ..ProcessorConfig::default()
        };
        let (proc, rx, calls) = responder(config);
        assert!(proc.handle(&incoming_request(9, 1)));
        assert!(proc.handle(&incoming_request(9, 1)));
        assert_eq!(drain(&rx).len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(proc.cached_responses(), 0);

        let config = ProcessorConfig {
            use_cache: false,
            allow_reprocess_repeated: true,
            ..ProcessorConfig::default()
        };
        let (proc, rx, calls) = responder(config);
        assert!(proc.handle(&incoming_request(9, 1)));
        assert!(proc.handle(&incoming_request(9, 1)));
        assert_eq!(drain(&rx).len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn rejected_request_is_not_marked() {
        let (tx, rx) = outbox();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let proc = RequestProcessor::<Double>::new(tx, move |_: &Ack<Double>| {
            counter.fetch_add(1, Ordering::SeqCst);
            None
        });

        assert!(!proc.handle(&incoming_request(2, 2)));
        assert!(!proc.handle(&incoming_request(2, 2)));
        assert!(drain(&rx).is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn response_is_delivered_to_waiter_once() {
        let (proc, _rx) = requester(ProcessorConfig::default());
        let k = proc.send_request(Double(8)).unwrap();

        assert!(proc.handle(&Ack::response(k, Double(16))));
        assert!(proc.handle(&Ack::response(k, Double(16))));

        let response = proc.await_response(k).unwrap();
        assert_eq!(response.payload(), &Double(16));
        assert_eq!(proc.pending_requests(), 0);

        // Late duplicate after delivery is still swallowed.
        assert!(proc.handle(&Ack::response(k, Double(16))));
        assert!(matches!(
            proc.await_response_timeout(k, Duration::from_millis(10)),
            Err(AckError::UnknownKey(_))
        ));
    }

    #[test]
    fn unmatched_response_is_left_for_others() {
        let (proc, _rx) = requester(ProcessorConfig::default());
        assert!(!proc.handle(&Ack::response(key(55), Double(1))));
    }

    #[test]
    fn on_response_false_leaves_state_untouched() {
        struct Picky;
        impl AckService<Double> for Picky {
            fn on_request(&self, _request: &Ack<Double>) -> Option<Double> {
                None
            }
            fn on_response(&self, response: &Ack<Double>) -> bool {
                response.payload().0 % 2 == 0
            }
        }

        let (tx, _rx) = outbox();
        let proc = RequestProcessor::new(tx, Picky);
        let k = proc.send_request(Double(1)).unwrap();

        assert!(!proc.handle(&Ack::response(k, Double(3))));
        assert!(proc.handle(&Ack::response(k, Double(4))));
        assert_eq!(proc.await_response(k).unwrap().payload(), &Double(4));
    }

    #[test]
    fn waiter_wakes_when_response_arrives() {
        let (proc, _rx) = requester(ProcessorConfig::default());
        let proc = Arc::new(proc);
        let k = proc.send_request(Double(5)).unwrap();

        let deliverer = {
            let proc = Arc::clone(&proc);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                proc.handle(&Ack::response(k, Double(10)))
            })
        };

        let response = proc
            .await_response_timeout(k, Duration::from_secs(5))
            .unwrap();
        assert_eq!(response.payload(), &Double(10));
        assert!(deliverer.join().unwrap());
    }

    #[test]
    fn unanswered_request_is_resent_with_same_key() {
        let config = ProcessorConfig {
            resend_interval: Duration::from_millis(10),
            ..ProcessorConfig::default()
        };
        let (proc, rx) = requester(config);
        let k = proc.send_request(Double(1)).unwrap();

        let err = proc
            .await_response_timeout(k, Duration::from_millis(60))
            .unwrap_err();
        assert!(matches!(err, AckError::Timeout(d) if d == Duration::from_millis(60)));

        let sent = drain(&rx);
        assert!(sent.len() >= 3, "expected resends, got {}", sent.len());
        assert!(sent.iter().all(|m| m.key() == k));
        assert_eq!(proc.pending_requests(), 1);
    }

    #[test]
    fn resending_stops_once_response_arrives() {
        let interval = Duration::from_millis(10);
        let config = ProcessorConfig {
            resend_interval: interval,
            ..ProcessorConfig::default()
        };
        let (proc, rx) = requester(config);
        let k = proc.send_request(Double(3)).unwrap();

        assert!(proc.await_response_timeout(k, interval * 3).is_err());
        assert!(drain(&rx).len() >= 2, "expected at least one resend");

        assert!(proc.handle(&Ack::response(k, Double(6))));
        assert_eq!(proc.await_response(k).unwrap().payload(), &Double(6));
        drain(&rx);

        std::thread::sleep(interval * 5);
        assert!(drain(&rx).is_empty());
        assert_eq!(proc.pending_requests(), 0);
    }

    #[test]
    fn no_resend_when_disabled() {
        let config = ProcessorConfig {
            resend_packet: false,
            resend_interval: Duration::from_millis(5),
            ..ProcessorConfig::default()
        };
        let (proc, rx) = requester(config);
        let k = proc.send_request(Double(1)).unwrap();

        assert!(proc
            .await_response_timeout(k, Duration::from_millis(30))
            .is_err());
        assert_eq!(drain(&rx).len(), 1);
    }

    #[test]
    fn key_space_exhaustion_fails_by_default() {
        let (proc, _rx) = requester(ProcessorConfig::default());
        proc.set_next_key(IdempotencyKey::MAX);

        assert_eq!(
            proc.send_request(Double(0)).unwrap(),
            key(IdempotencyKey::MAX)
        );
        assert!(matches!(
            proc.send_request(Double(0)),
            Err(AckError::KeySpaceExhausted)
        ));
    }

    #[test]
    fn key_space_wraps_when_configured() {
        let config = ProcessorConfig {
            key_exhaustion: KeyExhaustion::Wrap,
            ..ProcessorConfig::default()
        };
        let (proc, _rx, _calls) = responder(config);
        assert!(proc.handle(&incoming_request(1, 1)));

        proc.set_next_key(IdempotencyKey::MAX + 1);
        assert_eq!(proc.send_request(Double(0)).unwrap(), key(1));
        // Responder keys were forgotten with the wrap.
        assert!(!proc.lock().responder_keys.has_key(1));
        assert_eq!(proc.cached_responses(), 0);
    }

    #[test]
    fn wrapped_key_does_not_see_stale_response() {
        let config = ProcessorConfig {
            key_exhaustion: KeyExhaustion::Wrap,
            ..ProcessorConfig::default()
        };
        let (proc, _rx) = requester(config);
        let old = proc.send_request(Double(1)).unwrap();
        assert_eq!(old, key(1));
        // Delivered but never collected.
        assert!(proc.handle(&Ack::response(old, Double(111))));

        proc.set_next_key(IdempotencyKey::MAX + 1);
        let reused = proc.send_request(Double(2)).unwrap();
        assert_eq!(reused, key(1));
        assert_eq!(proc.pending_requests(), 1);
        assert!(matches!(
            proc.await_response_timeout(reused, Duration::from_millis(20)),
            Err(AckError::Timeout(_))
        ));

        assert!(proc.handle(&Ack::response(reused, Double(4))));
        assert_eq!(proc.await_response(reused).unwrap().payload(), &Double(4));
    }

    #[test]
    fn update_cache_evicts_expired_entries() {
        let config = ProcessorConfig {
            cache_expiry: Duration::ZERO,
            ..ProcessorConfig::default()
        };
        let (proc, _rx, _calls) = responder(config);
        assert!(proc.handle(&incoming_request(1, 1)));
        proc.send_request(Double(0)).unwrap();

        assert_eq!(proc.update_cache(), 2);
        assert_eq!(proc.cached_responses(), 0);
        assert_eq!(proc.pending_requests(), 0);
    }

    #[test]
    fn update_cache_keeps_fresh_entries() {
        let (proc, _rx, _calls) = responder(ProcessorConfig::default());
        assert!(proc.handle(&incoming_request(1, 1)));
        assert_eq!(proc.update_cache(), 0);
        assert_eq!(proc.cached_responses(), 1);
    }

    #[test]
    fn disconnected_outbox_fails_send() {
        let (tx, rx) = mpsc::channel::<Box<dyn Message>>();
        drop(rx);
        let proc = RequestProcessor::<Double>::requester(Arc::new(tx), ProcessorConfig::default());
        assert!(matches!(
            proc.send_request(Double(1)),
            Err(AckError::Disconnected)
        ));
        assert_eq!(proc.pending_requests(), 0);
    }

    #[test]
    fn ignores_other_message_types() {
        #[derive(Debug)]
        struct Other;
        impl Message for Other {
            fn payload_len(&self) -> usize {
                0
            }
            fn write_payload(&self, _dst: &mut BytesMut) -> ackframe_frame::Result<()> {
                Err(FrameError::InvalidPayload("unused".into()))
            }
        }

        let (proc, _rx, calls) = responder(ProcessorConfig::default());
        assert!(!proc.can_accept(&Other));
        assert!(!proc.handle(&Other));
        assert!(proc.can_accept(&incoming_request(1, 1)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn registers_as_critical_handler() {
        let (proc, rx, _calls) = responder(ProcessorConfig::default());
        let proc = Arc::new(proc);
        let mut dispatcher = Dispatcher::new();
        proc.register(&mut dispatcher);
        dispatcher.handle_all(Priority::Critical, |_| true);

        assert!(dispatcher.dispatch(&incoming_request(6, 3)));
        assert_eq!(drain(&rx)[0].payload(), &Double(6));
    }
}
