//! SPI controller driver

use std::fmt;
use std::str::FromStr;

use binho_core::{Capabilities, Connection, Error, Response, Result, ACK};

use crate::{decode_hex, parse_payload};

/// Bit order on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitOrder {
    MsbFirst,
    LsbFirst,
}

impl BitOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            BitOrder::MsbFirst => "MSBFIRST",
            BitOrder::LsbFirst => "LSBFIRST",
        }
    }
}

impl fmt::Display for BitOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BitOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "MSBFIRST" | "MSB" => Ok(BitOrder::MsbFirst),
            "LSBFIRST" | "LSB" => Ok(BitOrder::LsbFirst),
            _ => Err(Error::InvalidArgument(format!("unknown bit order '{}'", s))),
        }
    }
}

/// SPI controller
///
/// The adapter must be in SPI operating mode and the bus started with
/// [`begin`](Spi::begin) before transfers.
pub struct Spi<'a> {
    conn: &'a Connection,
    index: u8,
}

impl<'a> Spi<'a> {
    /// Driver for `SPI0`
    pub fn new(conn: &'a Connection) -> Result<Self> {
        conn.require(Capabilities::SPI)?;
        Ok(Self { conn, index: 0 })
    }

    fn tag(&self) -> String {
        format!("SPI{}", self.index)
    }

    async fn get(&self, setting: &str) -> Result<(String, Response)> {
        let command = format!("{} {} ?", self.tag(), setting);
        let expected = format!("-{} {}", self.tag(), setting);
        let response = self.conn.request(&command, &expected).await?;
        Ok((command, response))
    }

    async fn set(&self, setting: &str, value: impl fmt::Display) -> Result<()> {
        let command = format!("{} {} {}", self.tag(), setting, value);
        self.conn.request(&command, ACK).await.map(drop)
    }

    /// Clock frequency in Hz
    pub async fn clock_frequency(&self) -> Result<u32> {
        let (command, response) = self.get("CLK").await?;
        parse_payload(&command, &response)
    }

    pub async fn set_clock_frequency(&self, hz: u32) -> Result<()> {
        self.set("CLK", hz).await
    }

    pub async fn bit_order(&self) -> Result<BitOrder> {
        let (command, response) = self.get("ORDER").await?;
        parse_payload(&command, &response)
    }

    pub async fn set_bit_order(&self, order: BitOrder) -> Result<()> {
        self.set("ORDER", order).await
    }

    /// Clock polarity and phase, 0 to 3
    pub async fn mode(&self) -> Result<u8> {
        let (command, response) = self.get("MODE").await?;
        parse_payload(&command, &response)
    }

    pub async fn set_mode(&self, mode: u8) -> Result<()> {
        if mode > 3 {
            return Err(Error::InvalidArgument(format!(
                "SPI mode must be 0-3, not {}",
                mode
            )));
        }
        self.set("MODE", mode).await
    }

    /// Word size, 8 or 16 bits
    pub async fn bits_per_transfer(&self) -> Result<u8> {
        let (command, response) = self.get("TXBITS").await?;
        parse_payload(&command, &response)
    }

    pub async fn set_bits_per_transfer(&self, bits: u8) -> Result<()> {
        if bits != 8 && bits != 16 {
            return Err(Error::InvalidArgument(format!(
                "SPI transfers are 8 or 16 bits, not {}",
                bits
            )));
        }
        self.set("TXBITS", bits).await
    }

    /// Start the bus
    pub async fn begin(&self) -> Result<()> {
        let command = format!("{} BEGIN", self.tag());
        self.conn.request(&command, ACK).await.map(drop)
    }

    /// Stop the bus
    ///
    /// With `suppress_error` an error reply from the adapter (e.g. the bus
    /// was never started) is ignored. Timeouts and transport errors are
    /// still returned.
    pub async fn end(&self, suppress_error: bool) -> Result<()> {
        let command = format!("{} END", self.tag());
        match self.conn.request(&command, ACK).await {
            Err(Error::UnexpectedResponse { actual, .. }) if suppress_error => {
                log::debug!("spi: ignoring '{}' to '{}'", actual, command);
                Ok(())
            }
            other => other.map(drop),
        }
    }

    /// Full-duplex transfer; returns the bytes clocked in
    pub async fn transfer(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        let command = format!("{} TXRX {}", self.tag(), hex::encode_upper(data));
        let expected = format!("-{} RXD", self.tag());
        let response = self.conn.request(&command, &expected).await?;
        decode_hex(&command, response.payload().unwrap_or_default())
    }

    /// Buffered transfer of `count` bytes
    ///
    /// With `write` set, the first `count` bytes of `data` are sent;
    /// otherwise the first byte of `data` (or `0x00`) is repeated. With
    /// `read` unset the adapter discards MISO and an empty vector is
    /// returned.
    pub async fn write_to_read_from(
        &self,
        write: bool,
        read: bool,
        count: usize,
        data: &[u8],
    ) -> Result<Vec<u8>> {
        let packet = if write {
            if data.len() < count {
                return Err(Error::InvalidArgument(format!(
                    "{} bytes requested but only {} supplied",
                    count,
                    data.len()
                )));
            }
            if count == 0 {
                "0".to_string()
            } else {
                hex::encode_upper(&data[..count])
            }
        } else {
            let fill = data.first().copied().unwrap_or(0);
            hex::encode_upper(vec![fill; count])
        };
        let write_only = if read { "0" } else { "1" };

        let command = format!("{} WHR {} {} {}", self.tag(), write_only, count, packet);
        if !read {
            return self.conn.request(&command, ACK).await.map(|_| Vec::new());
        }
        let expected = format!("-{} RXD", self.tag());
        let response = self.conn.request(&command, &expected).await?;
        decode_hex(&command, response.payload().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Device, OperationMode};
    use crate::test_support::dummy_connection;

    async fn spi_ready(conn: &Connection) -> Spi<'_> {
        Device::new(conn)
            .set_operation_mode(OperationMode::Spi)
            .await
            .unwrap();
        let spi = Spi::new(conn).unwrap();
        spi.begin().await.unwrap();
        spi
    }

    #[tokio::test]
    async fn test_settings() {
        let (conn, _adapter) = dummy_connection().await;
        let spi = Spi::new(&conn).unwrap();

        spi.set_clock_frequency(1_000_000).await.unwrap();
        assert_eq!(spi.clock_frequency().await.unwrap(), 1_000_000);
        spi.set_bit_order(BitOrder::LsbFirst).await.unwrap();
        assert_eq!(spi.bit_order().await.unwrap(), BitOrder::LsbFirst);
        spi.set_mode(3).await.unwrap();
        assert_eq!(spi.mode().await.unwrap(), 3);
        spi.set_bits_per_transfer(16).await.unwrap();
        assert_eq!(spi.bits_per_transfer().await.unwrap(), 16);
    }

    #[tokio::test]
    async fn test_invalid_settings_are_not_sent() {
        let (conn, _adapter) = dummy_connection().await;
        let spi = Spi::new(&conn).unwrap();
        assert!(matches!(spi.set_mode(4).await, Err(Error::InvalidArgument(_))));
        assert!(matches!(
            spi.set_bits_per_transfer(12).await,
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_begin_twice_is_rejected() {
        let (conn, _adapter) = dummy_connection().await;
        let spi = spi_ready(&conn).await;
        assert_eq!(
            spi.begin().await,
            Err(Error::UnexpectedResponse {
                expected: "-OK".into(),
                actual: "-NG".into()
            })
        );
    }

    #[tokio::test]
    async fn test_transfer_loopback() {
        let (conn, _adapter) = dummy_connection().await;
        let spi = spi_ready(&conn).await;

        assert_eq!(
            spi.transfer(&[0x9F, 0x00, 0x00]).await.unwrap(),
            [0x9F, 0x00, 0x00]
        );
        assert_eq!(
            spi.write_to_read_from(true, true, 2, &[0xAB, 0xCD, 0xEF])
                .await
                .unwrap(),
            [0xAB, 0xCD]
        );
        assert!(spi
            .write_to_read_from(true, false, 1, &[0x06])
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            spi.write_to_read_from(false, true, 3, &[0xFF]).await.unwrap(),
            [0xFF, 0xFF, 0xFF]
        );
        assert!(matches!(
            spi.write_to_read_from(true, true, 4, &[0x01]).await,
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_end_suppress_error() {
        let (conn, _adapter) = dummy_connection().await;
        let spi = Spi::new(&conn).unwrap();

        assert!(spi.end(false).await.is_err());
        spi.end(true).await.unwrap();
    }

    #[test]
    fn test_bit_order_names() {
        assert_eq!("msb".parse::<BitOrder>().unwrap(), BitOrder::MsbFirst);
        assert_eq!(BitOrder::LsbFirst.to_string(), "LSBFIRST");
    }
}
