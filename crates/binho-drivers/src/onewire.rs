//! 1-Wire controller driver

use binho_core::{Capabilities, Connection, Error, Result, ACK};

use crate::{decode_hex, encode_hex};

/// Length of a 1-Wire ROM code
pub const ROM_LEN: usize = 8;

/// 1-Wire controller
pub struct OneWire<'a> {
    conn: &'a Connection,
    index: u8,
    pin_count: u8,
}

impl<'a> OneWire<'a> {
    /// Driver for `1WIRE0`
    pub fn new(conn: &'a Connection) -> Result<Self> {
        let info = conn.require(Capabilities::ONE_WIRE)?;
        Ok(Self {
            conn,
            index: 0,
            pin_count: info.io_pins,
        })
    }

    fn tag(&self) -> String {
        format!("1WIRE{}", self.index)
    }

    /// Start the bus on IO pin `pin`
    pub async fn begin(&self, pin: u8) -> Result<()> {
        if pin >= self.pin_count {
            return Err(Error::InvalidArgument(format!(
                "pin {} out of range, adapter has {} IO pins",
                pin, self.pin_count
            )));
        }
        self.conn
            .request(&format!("{} BEGIN {}", self.tag(), pin), ACK)
            .await
            .map(drop)
    }

    /// Issue a bus reset pulse
    pub async fn reset(&self) -> Result<()> {
        self.conn
            .request(&format!("{} RESET", self.tag()), ACK)
            .await
            .map(drop)
    }

    /// ROM code of the next device on the bus, `None` when the search is done
    pub async fn search(&self) -> Result<Option<[u8; ROM_LEN]>> {
        let command = format!("{} SEARCH", self.tag());
        let response = self
            .conn
            .request(&command, &format!("-{} ADDR", self.tag()))
            .await?;
        let payload = response.payload().unwrap_or_default().trim();
        if payload.eq_ignore_ascii_case("NONE") {
            return Ok(None);
        }
        let rom = decode_hex(&command, payload)?;
        rom.try_into().map(Some).map_err(|_| Error::InvalidPayload {
            command,
            payload: payload.to_string(),
        })
    }

    /// Write `write`, then read `read_len` bytes
    ///
    /// `power` keeps the strong pull-up enabled after the write, for
    /// parasite-powered devices.
    pub async fn write_read(&self, power: bool, write: &[u8], read_len: usize) -> Result<Vec<u8>> {
        let command = format!(
            "{} WHR {} {} {} {}",
            self.tag(),
            u8::from(power),
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
        decode_hex(&command, response.payload().unwrap_or_default())
    }
}
