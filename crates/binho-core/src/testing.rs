//! Scripted in-memory transport for unit tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportHalves, TransportReader, TransportWriter};

const POLL: Duration = Duration::from_millis(5);

/// How the scripted adapter answers one command
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Lines(Vec<String>),
    Delayed(Duration, Vec<String>),
    Silent,
}

impl Reply {
    pub(crate) fn lines<S: AsRef<str>>(lines: &[S]) -> Self {
        Reply::Lines(lines.iter().map(|l| l.as_ref().to_string()).collect())
    }

    pub(crate) fn delayed<S: AsRef<str>>(delay: Duration, lines: &[S]) -> Self {
        Reply::Delayed(delay, lines.iter().map(|l| l.as_ref().to_string()).collect())
    }
}

type Chunk = std::result::Result<Vec<u8>, String>;

#[derive(Default)]
struct Script {
    replies: Mutex<HashMap<String, Reply>>,
    written: Mutex<Vec<String>>,
    inbox: Mutex<Option<mpsc::Sender<Chunk>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    opens: AtomicUsize,
    readers_released: AtomicUsize,
    writers_released: AtomicUsize,
}

impl Script {
    fn send(&self, chunk: Chunk) {
        if let Some(inbox) = self.inbox.lock().unwrap().as_ref() {
            let _ = inbox.send(chunk);
        }
    }

    fn send_lines(&self, lines: &[String]) {
        for line in lines {
            self.send(Ok(format!("{}\n", line).into_bytes()));
        }
    }
}

/// Test-side view of a [`ScriptedTransport`]
#[derive(Clone)]
pub(crate) struct ScriptHandle(Arc<Script>);

impl ScriptHandle {
    /// Answer `command` with `reply` from now on
    pub(crate) fn reply(&self, command: &str, reply: Reply) {
        self.0
            .replies
            .lock()
            .unwrap()
            .insert(command.to_string(), reply);
    }

    /// Push a line as if the adapter sent it unprompted
    pub(crate) fn inject(&self, line: &str) {
        self.0.send(Ok(format!("{}\n", line).into_bytes()));
    }

    /// Make the next read fail as if the device was removed
    pub(crate) fn unplug(&self) {
        self.0.send(Err("device unplugged".to_string()));
    }

    /// Commands written so far, without terminators
    pub(crate) fn written(&self) -> Vec<String> {
        self.0.written.lock().unwrap().clone()
    }

    /// Highest number of commands written but not yet answered
    pub(crate) fn max_in_flight(&self) -> usize {
        self.0.max_in_flight.load(Ordering::SeqCst)
    }

    /// Successful `open()` calls
    pub(crate) fn opens(&self) -> usize {
        self.0.opens.load(Ordering::SeqCst)
    }

    /// Released (reader, writer) halves
    pub(crate) fn releases(&self) -> (usize, usize) {
        (
            self.0.readers_released.load(Ordering::SeqCst),
            self.0.writers_released.load(Ordering::SeqCst),
        )
    }
}

/// Transport whose adapter answers from a script
pub(crate) struct ScriptedTransport {
    script: Arc<Script>,
    present: bool,
}

impl ScriptedTransport {
    pub(crate) fn new() -> (Self, ScriptHandle) {
        let script = Arc::new(Script::default());
        (
            Self {
                script: script.clone(),
                present: true,
            },
            ScriptHandle(script),
        )
    }

    /// A transport whose port does not exist
    pub(crate) fn absent() -> (Self, ScriptHandle) {
        let (mut transport, handle) = Self::new();
        transport.present = false;
        (transport, handle)
    }
}

impl Transport for ScriptedTransport {
    fn open(&mut self) -> Result<Option<TransportHalves>> {
        if !self.present {
            return Ok(None);
        }
        let (tx, rx) = mpsc::channel();
        *self.script.inbox.lock().unwrap() = Some(tx);
        self.script.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Some(TransportHalves {
            reader: Box::new(ScriptedReader {
                script: self.script.clone(),
                rx,
                pending: Vec::new(),
            }),
            writer: Box::new(ScriptedWriter {
                script: self.script.clone(),
                partial: Vec::new(),
            }),
        }))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct ScriptedReader {
    script: Arc<Script>,
    rx: mpsc::Receiver<Chunk>,
    pending: Vec<u8>,
}

impl TransportReader for ScriptedReader {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv_timeout(POLL) {
                Ok(Ok(chunk)) => self.pending = chunk,
                Ok(Err(e)) => return Err(Error::Transport(e)),
                Err(RecvTimeoutError::Timeout) => return Ok(0),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::Transport("script closed".into()))
                }
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

impl Drop for ScriptedReader {
    fn drop(&mut self) {
        self.script.readers_released.fetch_add(1, Ordering::SeqCst);
    }
}

struct ScriptedWriter {
    script: Arc<Script>,
    partial: Vec<u8>,
}

impl ScriptedWriter {
    fn answer(&self, command: &str) {
        let reply = self.script.replies.lock().unwrap().get(command).cloned();
        let script = &self.script;
        let in_flight = script.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        script.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        match reply {
            Some(Reply::Lines(lines)) => {
                script.in_flight.fetch_sub(1, Ordering::SeqCst);
                script.send_lines(&lines);
            }
            Some(Reply::Delayed(delay, lines)) => {
                let script = script.clone();
                std::thread::spawn(move || {
                    std::thread::sleep(delay);
                    script.in_flight.fetch_sub(1, Ordering::SeqCst);
                    script.send_lines(&lines);
                });
            }
            Some(Reply::Silent) | None => {
                script.in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}

impl TransportWriter for ScriptedWriter {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.partial.extend_from_slice(data);
        while let Some(pos) = self.partial.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=pos).collect();
            let command = String::from_utf8_lossy(&line[..pos]).to_string();
            self.script.written.lock().unwrap().push(command.clone());
            self.answer(&command);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl Drop for ScriptedWriter {
    fn drop(&mut self) {
        self.script.writers_released.fetch_add(1, Ordering::SeqCst);
    }
}
