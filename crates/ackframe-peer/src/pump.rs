//! Reader and writer threads between a byte stream and the dispatcher.

use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ackframe_ack::{AckError, Outbox};
use ackframe_dispatch::Dispatcher;
use ackframe_frame::{FrameConfig, FrameError, FrameReader, FrameWriter, Message, Registry};

use crate::error::{PeerError, Result};

/// Pump behavior.
#[derive(Debug, Clone)]
pub struct PumpConfig {
    /// Frame limits and stream timeouts.
    pub frame: FrameConfig,
    /// How often idle loops check for shutdown.
    pub poll_interval: Duration,
}

impl Default for PumpConfig {
    fn default() -> Self {
        let poll_interval = Duration::from_millis(100);
        Self {
            frame: FrameConfig {
                read_timeout: Some(poll_interval),
                ..FrameConfig::default()
            },
            poll_interval,
        }
    }
}

/// Sending half of the outgoing queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Outgoing {
    tx: mpsc::Sender<Box<dyn Message>>,
}

/// Receiving half of the outgoing queue, drained by the pump's writer thread.
#[derive(Debug)]
pub struct OutgoingQueue {
    rx: mpsc::Receiver<Box<dyn Message>>,
}

impl Outgoing {
    /// Create a connected queue pair.
    ///
    /// Processors need the [`Outgoing`] half before the dispatcher is
    /// frozen and handed to [`Pump::spawn`], so the queue exists first.
    pub fn channel() -> (Outgoing, OutgoingQueue) {
        let (tx, rx) = mpsc::channel();
        (Outgoing { tx }, OutgoingQueue { rx })
    }

    /// Queue a message for sending.
    pub fn send(&self, message: impl Message) -> Result<()> {
        self.tx
            .send(Box::new(message))
            .map_err(|_| PeerError::Disconnected("outgoing queue closed".to_string()))
    }

    /// This queue as a processor outbox.
    pub fn outbox(&self) -> Arc<dyn Outbox> {
        Arc::new(self.clone())
    }
}

impl Outbox for Outgoing {
    fn enqueue(&self, message: Box<dyn Message>) -> std::result::Result<(), AckError> {
        self.tx.send(message).map_err(|_| AckError::Disconnected)
    }
}

/// Counters shared with the pump threads.
#[derive(Debug, Default)]
pub struct PumpStats {
    received: AtomicU64,
    unhandled: AtomicU64,
    rejected: AtomicU64,
    sent: AtomicU64,
}

impl PumpStats {
    /// Frames decoded and dispatched.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Dispatched messages no handler consumed.
    pub fn unhandled(&self) -> u64 {
        self.unhandled.load(Ordering::Relaxed)
    }

    /// Complete frames that failed to decode.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Frames written.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

/// A running pair of pump threads.
///
/// The reader thread reads frames, decodes them with the registry and
/// dispatches each one exactly once in arrival order. The writer thread
/// drains the [`OutgoingQueue`] and writes each message in submission order.
///
/// The reader notices shutdown only between reads, so the stream should
/// carry a read timeout (see [`PumpConfig::frame`]).
pub struct Pump {
    shutdown: Arc<AtomicBool>,
    stats: Arc<PumpStats>,
    reader: Option<JoinHandle<Result<()>>>,
    writer: Option<JoinHandle<Result<()>>>,
}

impl Pump {
    pub fn spawn<R, W>(
        reader: FrameReader<R>,
        writer: FrameWriter<W>,
        registry: Arc<Registry>,
        dispatcher: Arc<Dispatcher>,
        queue: OutgoingQueue,
        config: PumpConfig,
    ) -> Result<Self>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(PumpStats::default());

        let read_loop = ReadLoop {
            reader,
            registry: Arc::clone(&registry),
            dispatcher,
            shutdown: Arc::clone(&shutdown),
            stats: Arc::clone(&stats),
        };
        let reader = thread::Builder::new()
            .name("ackframe-reader".to_string())
            .spawn(move || read_loop.run())
            .map_err(|err| PeerError::Disconnected(format!("failed to spawn reader: {err}")))?;

        let write_loop = WriteLoop {
            writer,
            registry,
            queue,
            poll_interval: config.poll_interval,
            shutdown: Arc::clone(&shutdown),
            stats: Arc::clone(&stats),
        };
        let writer = match thread::Builder::new()
            .name("ackframe-writer".to_string())
            .spawn(move || write_loop.run())
        {
            Ok(handle) => handle,
            Err(err) => {
                shutdown.store(true, Ordering::SeqCst);
                return Err(PeerError::Disconnected(format!(
                    "failed to spawn writer: {err}"
                )));
            }
        };

        tracing::info!("packet pump started");
        Ok(Self {
            shutdown,
            stats,
            reader: Some(reader),
            writer: Some(writer),
        })
    }

    /// Ask both threads to stop.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Whether the pump is still supposed to run. Turns false after
    /// [`shutdown`](Pump::shutdown) or when either loop ends.
    pub fn is_running(&self) -> bool {
        !self.shutdown.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> &PumpStats {
        &self.stats
    }

    /// Wait for both threads and return the first error either one hit.
    pub fn join(mut self) -> Result<()> {
        let reader = join_thread(self.reader.take(), "reader");
        let writer = join_thread(self.writer.take(), "writer");
        tracing::info!(
            received = self.stats.received(),
            sent = self.stats.sent(),
            "packet pump stopped"
        );
        reader.and(writer)
    }
}

impl Drop for Pump {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

fn join_thread(handle: Option<JoinHandle<Result<()>>>, name: &'static str) -> Result<()> {
    match handle {
        Some(handle) => handle
            .join()
            .map_err(|_| PeerError::ThreadPanicked(name))?,
        None => Ok(()),
    }
}

/// Errors that leave the byte stream unusable.
fn is_stream_error(err: &FrameError) -> bool {
    matches!(
        err,
        FrameError::Io(_) | FrameError::ConnectionClosed | FrameError::EndOfStream
    )
}

fn is_timeout(err: &FrameError) -> bool {
    matches!(err, FrameError::Io(io) if matches!(io.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut))
}

struct ReadLoop<R> {
    reader: FrameReader<R>,
    registry: Arc<Registry>,
    dispatcher: Arc<Dispatcher>,
    shutdown: Arc<AtomicBool>,
    stats: Arc<PumpStats>,
}

impl<R: Read> ReadLoop<R> {
    fn run(mut self) -> Result<()> {
        let result = self.pump();
        self.shutdown.store(true, Ordering::SeqCst);
        result
    }

    fn pump(&mut self) -> Result<()> {
        while !self.shutdown.load(Ordering::SeqCst) {
            let frame = match self.reader.read_frame() {
                Ok(frame) => frame,
                Err(err) if is_timeout(&err) => continue,
                Err(FrameError::EndOfStream) => {
                    tracing::info!("peer closed the stream");
                    return Ok(());
                }
                Err(err) => {
                    if !self.shutdown.load(Ordering::SeqCst) {
                        tracing::warn!(error = %err, "read failed");
                    }
                    return Err(err.into());
                }
            };

            let tag = frame.tag;
            match self.registry.decode_frame(frame) {
                Ok(message) => {
                    self.stats.received.fetch_add(1, Ordering::Relaxed);
                    if !self.dispatcher.dispatch(&*message) {
                        self.stats.unhandled.fetch_add(1, Ordering::Relaxed);
                    }
                }
                // The frame was complete, so the stream is still in sync.
                Err(err) => {
                    self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(tag, error = %err, "dropping undecodable frame");
                }
            }
        }
        Ok(())
    }
}

struct WriteLoop<W> {
    writer: FrameWriter<W>,
    registry: Arc<Registry>,
    queue: OutgoingQueue,
    poll_interval: Duration,
    shutdown: Arc<AtomicBool>,
    stats: Arc<PumpStats>,
}

impl<W: Write> WriteLoop<W> {
    fn run(mut self) -> Result<()> {
        let result = self.pump();
        self.shutdown.store(true, Ordering::SeqCst);
        result
    }

    fn pump(&mut self) -> Result<()> {
        while !self.shutdown.load(Ordering::SeqCst) {
            let message = match self.queue.rx.recv_timeout(self.poll_interval) {
                Ok(message) => message,
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => return Ok(()),
            };

            match self.writer.send(&self.registry, &*message) {
                Ok(()) => {
                    self.stats.sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) if is_stream_error(&err) => {
                    tracing::warn!(error = %err, "write failed");
                    return Err(err.into());
                }
                Err(err) => {
                    tracing::warn!(message = message.name(), error = %err, "dropping unencodable message");
                }
            }
        }
        Ok(())
    }
}
