//! binho-dummy - Emulated Binho adapter for testing
//!
//! This crate provides a [`Transport`] backed by an in-memory emulation of
//! the Nova firmware. It's useful for testing drivers and the CLI without
//! real hardware.
//!
//! ```no_run
//! use binho_core::{Connection, ConnectionConfig};
//! use binho_dummy::DummyTransport;
//!
//! # async fn run() -> binho_core::Result<()> {
//! let (transport, adapter) = DummyTransport::new_default();
//! let conn = Connection::new(ConnectionConfig::new("dummy"), Box::new(transport));
//! conn.open().await?;
//! adapter.drive_input(3, 1);
//! # Ok(())
//! # }
//! ```

mod nova;

pub use nova::{DummyConfig, DummyNova, NG};

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use binho_core::error::{Error, Result};
use binho_core::transport::{Transport, TransportHalves, TransportReader, TransportWriter};

/// Read poll interval of the emulated port
const POLL_INTERVAL: Duration = Duration::from_millis(5);

struct Shared {
    nova: Mutex<DummyNova>,
    rx_line: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
}

impl Shared {
    fn nova(&self) -> MutexGuard<'_, DummyNova> {
        self.nova.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a line for the host to read
    fn send(&self, line: &str) {
        let rx_line = self.rx_line.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = rx_line.as_ref() {
            let _ = tx.send(format!("{}\n", line).into_bytes());
        }
    }
}

/// Handle for poking the emulated adapter from the outside
#[derive(Clone)]
pub struct DummyAdapter(Arc<Shared>);

impl DummyAdapter {
    /// Change the level on an input pin, emitting an interrupt if armed
    pub fn drive_input(&self, pin: u8, level: u8) {
        let line = self.0.nova().drive_input(pin, level);
        if let Some(line) = line {
            self.0.send(&line);
        }
    }

    /// Send a raw line to the host as if the firmware produced it
    pub fn inject(&self, line: &str) {
        self.0.send(line);
    }

    /// Run `f` against the emulated firmware state
    pub fn inspect<R>(&self, f: impl FnOnce(&DummyNova) -> R) -> R {
        f(&self.0.nova())
    }
}

/// Transport connected to an emulated adapter
pub struct DummyTransport {
    shared: Arc<Shared>,
}

impl DummyTransport {
    /// Create a transport and a handle to its emulated adapter
    pub fn new(config: DummyConfig) -> (Self, DummyAdapter) {
        let shared = Arc::new(Shared {
            nova: Mutex::new(DummyNova::new(config)),
            rx_line: Mutex::new(None),
        });
        (
            Self {
                shared: shared.clone(),
            },
            DummyAdapter(shared),
        )
    }

    /// Create a transport to a Nova with default settings
    pub fn new_default() -> (Self, DummyAdapter) {
        Self::new(DummyConfig::default())
    }
}

impl Transport for DummyTransport {
    fn open(&mut self) -> Result<Option<TransportHalves>> {
        let (tx, rx) = mpsc::channel();
        *self.shared.rx_line.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        log::info!("Opened emulated Binho Nova");

        Ok(Some(TransportHalves {
            reader: Box::new(DummyReader {
                rx,
                pending: Vec::new(),
            }),
            writer: Box::new(DummyWriter {
                shared: self.shared.clone(),
                line: Vec::new(),
            }),
        }))
    }

    fn name(&self) -> &str {
        "dummy"
    }
}

struct DummyReader {
    rx: mpsc::Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

impl TransportReader for DummyReader {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv_timeout(POLL_INTERVAL) {
                Ok(bytes) => self.pending = bytes,
                Err(RecvTimeoutError::Timeout) => return Ok(0),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::Transport("emulated adapter went away".into()))
                }
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

struct DummyWriter {
    shared: Arc<Shared>,
    line: Vec<u8>,
}

impl TransportWriter for DummyWriter {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        for &byte in data {
            if byte != b'\n' {
                self.line.push(byte);
                continue;
            }
            let command = String::from_utf8_lossy(&self.line).into_owned();
            self.line.clear();
            let replies = self.shared.nova().handle(command.trim_end_matches('\r'));
            for reply in replies {
                self.shared.send(&reply);
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
