//! Request/response coordination
//!
//! The protocol is strictly half-duplex: at most one command may be
//! outstanding. Callers queue on a FIFO admission lock, install a
//! [`PendingExchange`] holding a one-shot reply sender, write the command
//! and wait for the dispatcher to hand back the reply.
//!
//! A command that times out keeps its reply slot registered. The next
//! admitted caller waits for that reply and discards it before
//! transmitting, so a slow adapter cannot shift every later reply by one.
//! The wait lasts the late-reply grace period or the timed-out command's
//! own timeout, whichever is longer.
//!
//! A transport fault is recorded here as well as delivered to the pending
//! exchange, so callers still queued for admission see the same error.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, MutexGuard};

use crate::error::{Error, Result};
use crate::framer;
use crate::lock;
use crate::response::{classify, Response, ResponseKind, ACK, REPLY_MARKER};
use crate::state::{ConnectionState, StateCell};
use crate::transport::TransportWriter;

type ReplySender = oneshot::Sender<Result<Response>>;
type ReplyReceiver = oneshot::Receiver<Result<Response>>;

/// A command awaiting its reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    text: String,
    expected: String,
    issued_at: Instant,
}

impl Command {
    fn new(text: &str, expected: &str) -> Self {
        Self {
            text: text.to_string(),
            expected: expected.to_string(),
            issued_at: Instant::now(),
        }
    }

    /// Command text without terminator
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Reply prefix that correlates to this command
    pub fn expected(&self) -> &str {
        &self.expected
    }

    /// When the command was admitted
    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }
}

/// The single outstanding command and the slot its reply is delivered to
pub(crate) struct PendingExchange {
    id: u64,
    command: Command,
    reply: ReplySender,
}

/// Reply slot left behind by a command that timed out or was cancelled
struct LateReply {
    id: u64,
    command: String,
    timeout: Duration,
    reply: ReplyReceiver,
}

#[derive(Default)]
struct Admission {
    late: Option<LateReply>,
}

/// Serialises commands and matches them to replies
pub struct Coordinator {
    admission: tokio::sync::Mutex<Admission>,
    slot: Mutex<Option<PendingExchange>>,
    writer: Mutex<Option<Box<dyn TransportWriter>>>,
    next_id: AtomicU64,
    late_reply_grace: Duration,
    fault: Mutex<Option<Error>>,
}

impl Coordinator {
    /// Create a coordinator with no transport attached
    pub fn new(late_reply_grace: Duration) -> Self {
        Self {
            admission: tokio::sync::Mutex::new(Admission::default()),
            slot: Mutex::new(None),
            writer: Mutex::new(None),
            next_id: AtomicU64::new(1),
            late_reply_grace,
            fault: Mutex::new(None),
        }
    }

    /// Hand the writing half of a freshly opened transport to the coordinator
    pub(crate) fn attach_writer(&self, writer: Box<dyn TransportWriter>) {
        *lock(&self.fault) = None;
        *lock(&self.writer) = Some(writer);
    }

    /// Take the writing half back for release
    pub(crate) fn detach_writer(&self) -> Option<Box<dyn TransportWriter>> {
        lock(&self.writer).take()
    }

    /// Transport error that faulted the connection, if any
    pub fn fault(&self) -> Option<Error> {
        lock(&self.fault).clone()
    }

    /// Remember the error that faulted the connection
    pub(crate) fn record_fault(&self, error: Error) {
        let mut fault = lock(&self.fault);
        if fault.is_none() {
            *fault = Some(error);
        }
    }

    /// Number of commands awaiting a reply (never more than one)
    pub fn outstanding(&self) -> usize {
        usize::from(lock(&self.slot).is_some())
    }

    /// Issue `command` and wait up to `timeout` for a reply starting with `expected`
    ///
    /// `expected` is either [`ACK`] or a data prefix such as `-SPI0 CLK`.
    /// The command is only transmitted while the connection is in one of
    /// the `allowed` states.
    pub async fn execute(
        &self,
        state: &StateCell,
        allowed: &[ConnectionState],
        command: &str,
        expected: &str,
        timeout: Duration,
    ) -> Result<Response> {
        if !expected.starts_with(REPLY_MARKER) {
            return Err(Error::InvalidArgument(format!(
                "expected prefix '{}' must start with '{}'",
                expected, REPLY_MARKER
            )));
        }
        let frame = framer::encode(command)?;
        state.ensure(allowed)?;

        let mut admission = self.admission.lock().await;
        self.settle_late_reply(&mut admission).await;
        self.ensure_admitted(state, allowed)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.install(PendingExchange {
            id,
            command: Command::new(command, expected),
            reply: tx,
        });

        let mut in_flight = InFlight {
            admission,
            id,
            command: command.to_string(),
            timeout,
            reply: Some(rx),
        };

        log::trace!("TX: {}", command);
        if let Err(e) = self.transmit(state, &frame) {
            in_flight.reply = None;
            self.clear_pending(id);
            return Err(e);
        }

        match in_flight.wait(timeout).await {
            Some(Ok(Ok(response))) => interpret(response, expected),
            Some(Ok(Err(e))) => Err(e),
            Some(Err(_)) => Err(Error::NotConnected { state: state.get() }),
            None => {
                log::debug!("coordinator: '{}' timed out after {:?}", command, timeout);
                Err(Error::Timeout {
                    command: command.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Deliver a reply line to the pending exchange
    ///
    /// Returns `false` if nothing was waiting, in which case the line is
    /// unsolicited.
    pub(crate) fn route_reply(&self, line: &str) -> bool {
        let Some(pending) = lock(&self.slot).take() else {
            return false;
        };
        let response = classify(line, Some(&pending.command.expected));
        log::trace!(
            "coordinator: '{}' answered after {:?}",
            pending.command.text,
            pending.command.issued_at.elapsed()
        );
        // The receiver is gone if the caller was cancelled; nothing to do then
        let _ = pending.reply.send(Ok(response));
        true
    }

    /// Fail the pending exchange, if any, with `error`
    pub(crate) fn fail_pending(&self, error: Error) {
        if let Some(pending) = lock(&self.slot).take() {
            log::debug!(
                "coordinator: failing '{}': {}",
                pending.command.text,
                error
            );
            let _ = pending.reply.send(Err(error));
        }
    }

    fn install(&self, pending: PendingExchange) {
        if let Some(stale) = lock(&self.slot).replace(pending) {
            log::warn!(
                "coordinator: dropping stale exchange for '{}'",
                stale.command.text
            );
        }
    }

    fn clear_pending(&self, id: u64) {
        let mut slot = lock(&self.slot);
        if slot.as_ref().is_some_and(|p| p.id == id) {
            *slot = None;
        }
    }

    fn transmit(&self, state: &StateCell, frame: &[u8]) -> Result<()> {
        let mut writer = lock(&self.writer);
        let Some(writer) = writer.as_mut() else {
            return Err(Error::NotConnected { state: state.get() });
        };
        let result = writer.write_all(frame).and_then(|()| writer.flush());
        if let Err(e) = &result {
            log::error!("coordinator: write failed: {}", e);
            self.record_fault(e.clone());
            state.fault();
        }
        result
    }

    /// State check after admission; a faulted connection reports its cause
    fn ensure_admitted(&self, state: &StateCell, allowed: &[ConnectionState]) -> Result<()> {
        state.ensure(allowed).map_err(|e| match state.get() {
            ConnectionState::Faulted => self.fault().unwrap_or(e),
            _ => e,
        })
    }

    async fn settle_late_reply(&self, admission: &mut Admission) {
        let Some(late) = admission.late.take() else {
            return;
        };
        let window = self.late_reply_grace.max(late.timeout);
        match tokio::time::timeout(window, late.reply).await {
            Ok(Ok(Ok(response))) => {
                let discarded = Response::new(response.raw(), ResponseKind::Unsolicited, None);
                log::debug!(
                    "coordinator: discarding late reply '{}' to '{}'",
                    discarded.raw(),
                    late.command
                );
            }
            Ok(Ok(Err(e))) => {
                log::debug!("coordinator: late exchange '{}' failed: {}", late.command, e)
            }
            Ok(Err(_)) => {}
            Err(_) => log::warn!(
                "coordinator: no late reply to '{}' within {:?}",
                late.command,
                window
            ),
        }
        self.clear_pending(late.id);
    }
}

/// Admission held for the duration of one exchange
///
/// If dropped before the reply arrived (timeout or cancellation) the reply
/// slot is parked as a late reply for the next caller to drain.
struct InFlight<'a> {
    admission: MutexGuard<'a, Admission>,
    id: u64,
    command: String,
    timeout: Duration,
    reply: Option<ReplyReceiver>,
}

impl InFlight<'_> {
    async fn wait(
        &mut self,
        timeout: Duration,
    ) -> Option<std::result::Result<Result<Response>, oneshot::error::RecvError>> {
        let reply = self.reply.as_mut()?;
        let result = tokio::time::timeout(timeout, reply).await.ok()?;
        self.reply = None;
        Some(result)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(reply) = self.reply.take() {
            self.admission.late = Some(LateReply {
                id: self.id,
                command: std::mem::take(&mut self.command),
                timeout: self.timeout,
                reply,
            });
        }
    }
}

fn interpret(response: Response, expected: &str) -> Result<Response> {
    match response.kind() {
        ResponseKind::Ack if expected == ACK => Ok(response),
        ResponseKind::Data => Ok(response),
        _ => Err(Error::UnexpectedResponse {
            expected: expected.to_string(),
            actual: response.raw().to_string(),
        }),
    }
}
