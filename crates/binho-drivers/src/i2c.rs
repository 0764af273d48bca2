//! I2C controller driver

use binho_core::{Capabilities, Connection, Error, Result, ACK};

use crate::{decode_hex, encode_hex, parse_payload};

/// First address probed by [`I2c::scan`]
pub const SCAN_FIRST: u8 = 0x08;
/// Last address probed by [`I2c::scan`]
pub const SCAN_LAST: u8 = 0x77;

/// I2C controller
pub struct I2c<'a> {
    conn: &'a Connection,
    index: u8,
}

impl<'a> I2c<'a> {
    /// Driver for `I2C0`
    pub fn new(conn: &'a Connection) -> Result<Self> {
        conn.require(Capabilities::I2C)?;
        Ok(Self { conn, index: 0 })
    }

    fn tag(&self) -> String {
        format!("I2C{}", self.index)
    }

    /// Bus clock in Hz
    pub async fn frequency(&self) -> Result<u32> {
        let command = format!("{} FREQ ?", self.tag());
        let response = self
            .conn
            .request(&command, &format!("-{} FREQ", self.tag()))
            .await?;
        parse_payload(&command, &response)
    }

    pub async fn set_frequency(&self, hz: u32) -> Result<()> {
        self.conn
            .request(&format!("{} FREQ {}", self.tag(), hz), ACK)
            .await
            .map(drop)
    }

    /// Enable or disable the on-board pull-up resistors
    pub async fn set_pullups(&self, enable: bool) -> Result<()> {
        self.conn
            .request(&format!("{} PULL {}", self.tag(), u8::from(enable)), ACK)
            .await
            .map(drop)
    }

    /// Whether a device acknowledges `address`
    pub async fn scan_address(&self, address: u8) -> Result<bool> {
        check_address(address)?;
        let command = format!("{} SCAN 0x{:02X}", self.tag(), address);
        let response = self
            .conn
            .request(&command, &format!("-{} SCAN", self.tag()))
            .await?;

        let payload = response.payload().unwrap_or_default();
        let invalid = || Error::InvalidPayload {
            command: command.clone(),
            payload: payload.to_string(),
        };
        let (echoed, status) = payload.split_once(' ').ok_or_else(invalid)?;
        let echoed = echoed
            .strip_prefix("0x")
            .and_then(|a| u8::from_str_radix(a, 16).ok())
            .ok_or_else(invalid)?;
        if echoed != address {
            return Err(invalid());
        }
        match status.trim() {
            "OK" => Ok(true),
            "NACK" => Ok(false),
            _ => Err(invalid()),
        }
    }

    /// Addresses in 0x08..=0x77 that acknowledge
    pub async fn scan(&self) -> Result<Vec<u8>> {
        let mut found = Vec::new();
        for address in SCAN_FIRST..=SCAN_LAST {
            if self.scan_address(address).await? {
                log::debug!("i2c: device at 0x{:02X}", address);
                found.push(address);
            }
        }
        Ok(found)
    }

    /// Write `write`, then read `read_len` bytes, in one transaction
    pub async fn write_read(&self, address: u8, write: &[u8], read_len: usize) -> Result<Vec<u8>> {
        check_address(address)?;
        let command = format!(
            "{} WHR 0x{:02X} {} {} {}",
            self.tag(),
            address,
            read_len,
            write.len(),
            encode_hex(write)
        );
        if read_len == 0 {
            return self.conn.request(&command, ACK).await.map(|_| Vec::new());
        }

        let response = self
            .conn
            .request(&command, &format!("-{} RXD", self.tag()))
            .await?;
        let payload = response.payload().unwrap_or_default();
        let data = decode_hex(&command, payload)?;
        if data.len() != read_len {
            return Err(Error::InvalidPayload {
                command,
                payload: payload.to_string(),
            });
        }
        Ok(data)
    }

    pub async fn write(&self, address: u8, data: &[u8]) -> Result<()> {
        self.write_read(address, data, 0).await.map(drop)
    }

    pub async fn read(&self, address: u8, len: usize) -> Result<Vec<u8>> {
        self.write_read(address, &[], len).await
    }
}

fn check_address(address: u8) -> Result<()> {
    if address > 0x7F {
        return Err(Error::InvalidArgument(format!(
            "0x{:02X} is not a 7-bit I2C address",
            address
        )));
    }
    Ok(())
}
