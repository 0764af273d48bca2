//! Interrupt dispatcher
//!
//! A dedicated thread is the only reader of the transport. It frames the
//! byte stream into lines, hands reply lines to the coordinator and turns
//! interrupt lines into [`InterruptEvent`]s. The read loop never waits on
//! consumers: events for sources without a handler go into a bounded queue
//! that drops its oldest entry when full.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use crate::connection::Shared;
use crate::error::{Error, Result};
use crate::framer::LineFramer;
use crate::lock;
use crate::response::{parse_interrupt, REPLY_MARKER};
use crate::transport::TransportReader;

/// Notification pushed by the adapter outside the request/response cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterruptEvent {
    /// Pin or channel tag, e.g. `IO3`
    pub source: String,
    /// Text following the tag (may be empty)
    pub value: String,
    /// When the dispatcher read the line
    pub timestamp: Instant,
}

/// Callback invoked on the dispatcher thread for one interrupt source
///
/// Handlers run inline with the read loop and must not block.
pub type InterruptHandler = Arc<dyn Fn(&InterruptEvent) + Send + Sync>;

/// Bounded FIFO of interrupt events with drop-oldest overflow
pub struct InterruptQueue {
    events: Mutex<VecDeque<InterruptEvent>>,
    capacity: usize,
    dropped: AtomicU64,
    closed: AtomicBool,
    notify: Notify,
}

impl InterruptQueue {
    /// Create a queue holding at most `capacity` events
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Append an event, evicting the oldest one if the queue is full
    pub fn push(&self, event: InterruptEvent) {
        {
            let mut events = lock(&self.events);
            if events.len() == self.capacity {
                if let Some(evicted) = events.pop_front() {
                    let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    log::warn!(
                        "interrupt queue full, dropped event from {} ({} dropped so far)",
                        evicted.source,
                        total
                    );
                }
            }
            events.push_back(event);
        }
        self.notify.notify_waiters();
    }

    /// Take the oldest event without waiting
    pub fn try_pop(&self) -> Option<InterruptEvent> {
        lock(&self.events).pop_front()
    }

    /// Wait for the next event
    ///
    /// Returns `None` once the queue has been closed and emptied.
    pub async fn pop(&self) -> Option<InterruptEvent> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(event) = self.try_pop() {
                return Some(event);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    /// Number of buffered events
    pub fn len(&self) -> usize {
        lock(&self.events).len()
    }

    /// Whether no events are buffered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events evicted because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub(crate) fn reopen(&self) {
        self.closed.store(false, Ordering::Release);
    }
}

/// Routes interrupt events to handlers or the queue
pub struct Interrupts {
    queue: InterruptQueue,
    handlers: RwLock<HashMap<String, InterruptHandler>>,
}

impl Interrupts {
    /// Create a router with a queue of `capacity` events
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: InterruptQueue::new(capacity),
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Queue receiving events for sources without a handler
    pub fn queue(&self) -> &InterruptQueue {
        &self.queue
    }

    /// Register `handler` for `source`, replacing any previous one
    pub fn register(&self, source: impl Into<String>, handler: InterruptHandler) {
        let source = source.into();
        log::debug!("interrupts: handler registered for {}", source);
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(source, handler);
    }

    /// Remove the handler for `source`; later events go to the queue
    pub fn unregister(&self, source: &str) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(source)
            .is_some()
    }

    /// Hand an event to its handler, or queue it
    pub fn deliver(&self, event: InterruptEvent) {
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&event.source)
            .cloned();
        match handler {
            Some(handler) => handler(&event),
            None => self.queue.push(event),
        }
    }
}

/// Running dispatcher thread
pub(crate) struct DispatcherHandle {
    stop: Arc<AtomicBool>,
    done: mpsc::Receiver<()>,
    thread: Option<JoinHandle<()>>,
}

impl DispatcherHandle {
    /// Start the read loop on its own thread
    pub(crate) fn spawn(
        name: &str,
        reader: Box<dyn TransportReader>,
        shared: Arc<Shared>,
    ) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let (done_tx, done) = mpsc::channel();
        let thread = std::thread::Builder::new()
            .name(format!("binho-dispatch {}", name))
            .spawn({
                let stop = Arc::clone(&stop);
                move || {
                    read_loop(reader, &shared, &stop);
                    let _ = done_tx.send(());
                }
            })
            .map_err(|e| Error::Transport(format!("cannot start dispatcher: {}", e)))?;

        Ok(Self {
            stop,
            done,
            thread: Some(thread),
        })
    }

    /// Ask the loop to stop and join it, waiting at most `wait`
    pub(crate) fn stop(mut self, wait: Duration) {
        self.stop.store(true, Ordering::Release);
        let Some(thread) = self.thread.take() else {
            return;
        };
        if thread.thread().id() == std::thread::current().id() {
            // Closed from an interrupt handler; the loop exits on its next pass
            return;
        }
        match self.done.recv_timeout(wait) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                if thread.join().is_err() {
                    log::error!("dispatcher thread panicked");
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                log::warn!("dispatcher did not stop within {:?}, detaching", wait);
            }
        }
    }
}

fn read_loop(mut reader: Box<dyn TransportReader>, shared: &Shared, stop: &AtomicBool) {
    let mut framer = LineFramer::new();
    let mut buf = [0u8; 512];

    log::debug!("dispatcher: started");
    while !stop.load(Ordering::Acquire) {
        match reader.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                framer.push(&buf[..n]);
                while let Some(line) = framer.next_line() {
                    dispatch_line(shared, &line);
                }
            }
            Err(e) => {
                if stop.load(Ordering::Acquire) {
                    break;
                }
                log::error!("dispatcher: read failed: {}", e);
                shared.coordinator.record_fault(e.clone());
                shared.state.fault();
                shared.coordinator.fail_pending(e);
                shared.interrupts.queue().close();
                break;
            }
        }
    }
    if framer.pending() > 0 {
        log::debug!("dispatcher: {} bytes of partial line discarded", framer.pending());
    }
    log::debug!("dispatcher: stopped");
}

fn dispatch_line(shared: &Shared, line: &str) {
    log::trace!("RX: {}", line);
    if line.starts_with(REPLY_MARKER) {
        if !shared.coordinator.route_reply(line) {
            log::debug!("dispatcher: unsolicited reply '{}'", line);
        }
    } else if let Some((source, value)) = parse_interrupt(line) {
        shared.interrupts.deliver(InterruptEvent {
            source: source.to_string(),
            value: value.to_string(),
            timestamp: Instant::now(),
        });
    } else if !line.is_empty() {
        log::debug!("dispatcher: unsolicited '{}'", line);
    }
}
