//! Adapter-level commands (`+` prefix)

use std::fmt;
use std::str::FromStr;

use binho_core::{Connection, Error, Result, ACK};

use crate::parse_payload;

/// Subsystem the adapter's pins are assigned to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationMode {
    Io,
    I2c,
    Spi,
    OneWire,
    Uart,
    Swi,
}

impl OperationMode {
    /// Wire name of the mode
    pub fn as_str(self) -> &'static str {
        match self {
            OperationMode::Io => "IO",
            OperationMode::I2c => "I2C",
            OperationMode::Spi => "SPI",
            OperationMode::OneWire => "1WIRE",
            OperationMode::Uart => "UART",
            OperationMode::Swi => "SWI",
        }
    }
}

impl fmt::Display for OperationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "IO" => Ok(OperationMode::Io),
            "I2C" => Ok(OperationMode::I2c),
            "SPI" => Ok(OperationMode::Spi),
            "1WIRE" => Ok(OperationMode::OneWire),
            "UART" => Ok(OperationMode::Uart),
            "SWI" => Ok(OperationMode::Swi),
            _ => Err(Error::InvalidArgument(format!(
                "unknown operation mode '{}'",
                s
            ))),
        }
    }
}

/// Identity, versions, operating mode and reset
pub struct Device<'a> {
    conn: &'a Connection,
}

impl<'a> Device<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn text(&self, command: &str, expected: &str) -> Result<String> {
        Ok(self.conn.request(command, expected).await?.into_payload())
    }

    /// Device ID as reported by the firmware
    pub async fn device_id(&self) -> Result<String> {
        self.text("+ID", "-ID").await
    }

    pub async fn firmware_version(&self) -> Result<String> {
        self.text("+FWVER", "-FWVER").await
    }

    pub async fn hardware_version(&self) -> Result<String> {
        self.text("+HWVER", "-HWVER").await
    }

    pub async fn command_version(&self) -> Result<String> {
        self.text("+CMDVER", "-CMDVER").await
    }

    /// Round trip a no-op command
    pub async fn ping(&self) -> Result<()> {
        self.conn.request("+PING", ACK).await.map(drop)
    }

    pub async fn operation_mode(&self) -> Result<OperationMode> {
        let command = "+MODE 0 ?";
        let response = self.conn.request(command, "-MODE 0").await?;
        parse_payload(command, &response)
    }

    pub async fn set_operation_mode(&self, mode: OperationMode) -> Result<()> {
        log::debug!("device: switching to {} mode", mode);
        self.conn
            .request(&format!("+MODE 0 {}", mode), ACK)
            .await
            .map(drop)
    }

    /// Reset the adapter's firmware state
    pub async fn reset(&self) -> Result<()> {
        self.conn.request("+RESET", ACK).await.map(drop)
    }

    /// Reboot into the DFU bootloader
    ///
    /// The adapter stops answering commands; the connection should be
    /// closed afterwards.
    pub async fn reset_to_bootloader(&self) -> Result<()> {
        self.conn.request("+BTL", ACK).await.map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::dummy_connection;

    #[tokio::test]
    async fn test_versions() {
        let (conn, _adapter) = dummy_connection().await;
        let device = Device::new(&conn);

        assert_eq!(
            device.device_id().await.unwrap(),
            conn.device_info().unwrap().device_id
        );
        assert_eq!(device.firmware_version().await.unwrap(), "0.2.8");
        assert_eq!(device.hardware_version().await.unwrap(), "1.0");
        assert_eq!(device.command_version().await.unwrap(), "1");
        device.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_operation_mode() {
        let (conn, adapter) = dummy_connection().await;
        let device = Device::new(&conn);

        assert_eq!(device.operation_mode().await.unwrap(), OperationMode::Io);
        device.set_operation_mode(OperationMode::OneWire).await.unwrap();
        assert_eq!(
            device.operation_mode().await.unwrap(),
            OperationMode::OneWire
        );
        assert_eq!(adapter.inspect(|n| n.operation_mode().to_string()), "1WIRE");
    }

    #[tokio::test]
    async fn test_reset_to_bootloader() {
        let (conn, adapter) = dummy_connection().await;
        Device::new(&conn).reset_to_bootloader().await.unwrap();
        assert!(adapter.inspect(|n| n.in_bootloader()));
    }

    #[test]
    fn test_mode_names() {
        assert_eq!("i2c".parse::<OperationMode>().unwrap(), OperationMode::I2c);
        assert_eq!(OperationMode::OneWire.to_string(), "1WIRE");
        assert!("CAN".parse::<OperationMode>().is_err());
    }
}
