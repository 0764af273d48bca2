//! Transport layer abstraction
//!
//! A [`Transport`] is created with the connection and opened during
//! `Connection::open`. Opening yields two halves: the reader is moved into
//! the dispatcher thread, the writer is held by the coordinator. The port
//! is released when both halves have been dropped.

use crate::error::Result;

/// Maximum number of reads performed by [`TransportReader::drain`]
const DRAIN_MAX_READS: usize = 64;

/// Receiving half of an open transport
pub trait TransportReader: Send {
    /// Read whatever bytes are available
    ///
    /// Blocks for at most the transport's poll interval and returns
    /// `Ok(0)` if nothing arrived in that time.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Discard stale input left over from a previous session
    ///
    /// Returns the number of bytes thrown away.
    fn drain(&mut self) -> Result<usize> {
        let mut buf = [0u8; 512];
        let mut total = 0;
        for _ in 0..DRAIN_MAX_READS {
            let n = self.read(&mut buf)?;
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }
}

/// Sending half of an open transport
pub trait TransportWriter: Send {
    /// Write all bytes to the transport
    fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Flush any buffered data
    fn flush(&mut self) -> Result<()>;
}

/// The two halves of an open transport
pub struct TransportHalves {
    /// Owned by the dispatcher thread
    pub reader: Box<dyn TransportReader>,
    /// Owned by the coordinator
    pub writer: Box<dyn TransportWriter>,
}

/// Byte channel to an adapter
pub trait Transport: Send {
    /// Open the underlying channel
    ///
    /// Returns `Ok(None)` if the device is not present, which the lifecycle
    /// manager reports as a status rather than an error.
    fn open(&mut self) -> Result<Option<TransportHalves>>;

    /// Human-readable name for logs (e.g. the port path)
    fn name(&self) -> &str;
}

pub mod serial {
    //! Serial port transport implementation

    use super::*;
    use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
    use std::io::{Read, Write};
    use std::time::Duration;

    use crate::config::ConnectionConfig;
    use crate::error::Error;

    /// Serial (USB CDC) transport
    pub struct SerialTransport {
        path: String,
        baud_rate: u32,
        poll_interval: Duration,
    }

    impl SerialTransport {
        /// Describe a serial port to be opened later
        pub fn new(path: impl Into<String>, baud_rate: u32, poll_interval: Duration) -> Self {
            Self {
                path: path.into(),
                baud_rate,
                poll_interval,
            }
        }

        /// Build a transport from connection settings
        pub fn from_config(config: &ConnectionConfig) -> Self {
            Self::new(&config.port, config.baud_rate, config.read_poll())
        }
    }

    impl Transport for SerialTransport {
        fn open(&mut self) -> Result<Option<TransportHalves>> {
            let port = match serialport::new(&self.path, self.baud_rate)
                .data_bits(DataBits::Eight)
                .parity(Parity::None)
                .stop_bits(StopBits::One)
                .flow_control(FlowControl::None)
                .timeout(self.poll_interval)
                .open()
            {
                Ok(port) => port,
                Err(e) if is_not_present(&e) => {
                    log::debug!("serial: {} not present: {}", self.path, e);
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            };

            port.clear(ClearBuffer::All)?;
            let writer = port.try_clone()?;

            log::info!("Opened serial port {} at {} baud", self.path, self.baud_rate);

            Ok(Some(TransportHalves {
                reader: Box::new(SerialReader { port }),
                writer: Box::new(SerialWriter { port: writer }),
            }))
        }

        fn name(&self) -> &str {
            &self.path
        }
    }

    fn is_not_present(e: &serialport::Error) -> bool {
        matches!(
            e.kind(),
            serialport::ErrorKind::NoDevice
                | serialport::ErrorKind::Io(std::io::ErrorKind::NotFound)
        )
    }

    struct SerialReader {
        port: Box<dyn SerialPort>,
    }

    impl TransportReader for SerialReader {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            match self.port.read(buf) {
                Ok(n) => Ok(n),
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::TimedOut
                            | std::io::ErrorKind::WouldBlock
                            | std::io::ErrorKind::Interrupted
                    ) =>
                {
                    Ok(0)
                }
                Err(e) => Err(Error::from(e)),
            }
        }
    }

    struct SerialWriter {
        port: Box<dyn SerialPort>,
    }

    impl TransportWriter for SerialWriter {
        fn write_all(&mut self, data: &[u8]) -> Result<()> {
            self.port.write_all(data)?;
            Ok(())
        }

        fn flush(&mut self) -> Result<()> {
            self.port.flush()?;
            Ok(())
        }
    }
}
