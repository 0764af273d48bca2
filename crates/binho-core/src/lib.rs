//! binho-core - Device communication layer for Binho host adapters
//!
//! This crate talks to a Binho adapter over its USB CDC serial port. It
//! provides:
//! - A [`Transport`] abstraction with a serialport-backed implementation
//! - Line framing and reply classification for the ASCII protocol
//! - A [`Connection`] that serialises commands, matches them to replies and
//!   routes asynchronous interrupt notifications to handlers or a queue
//!
//! Protocol drivers (SPI, I2C, GPIO, 1-Wire) live in `binho-drivers` and are
//! built on [`Connection::execute`].
//!
//! # Example
//! ```no_run
//! use binho_core::{Connection, ConnectionConfig, OpenStatus};
//!
//! # async fn run() -> binho_core::Result<()> {
//! let conn = Connection::serial(ConnectionConfig::new("/dev/ttyACM0"));
//! if let OpenStatus::Ready(info) = conn.open().await? {
//!     println!("connected to {}", info.device_id);
//!     let clk = conn.request("SPI0 CLK ?", "-SPI0 CLK").await?;
//!     println!("SPI clock: {} Hz", clk.payload().unwrap_or("?"));
//! }
//! conn.close();
//! # Ok(())
//! # }
//! ```

pub mod capabilities;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod framer;
pub mod response;
pub mod state;
pub mod transport;

#[cfg(test)]
mod testing;

pub use capabilities::{AdapterVariant, Capabilities, DeviceInfo, BINHO_VENDOR_ID, NOVA_PRODUCT_ID};
pub use config::{ConnectionConfig, DeviceIdentity};
pub use connection::{Connection, OpenStatus};
pub use coordinator::Command;
pub use dispatcher::{InterruptEvent, InterruptHandler, InterruptQueue};
pub use error::{Error, Result};
pub use response::{Response, ResponseKind, ACK};
pub use state::ConnectionState;
pub use transport::serial::SerialTransport;
pub use transport::{Transport, TransportHalves, TransportReader, TransportWriter};

use std::sync::{Mutex, MutexGuard};

/// Lock a mutex, recovering the data if a previous holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
