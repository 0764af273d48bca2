//! binho-drivers - Protocol drivers for Binho host adapters
//!
//! Each driver borrows an open [`Connection`], formats command text for one
//! subsystem and parses the payload of the reply. Drivers hold no state of
//! their own beyond the bus index.
//!
//! | Driver | Subsystem |
//! |---|---|
//! | [`Device`] | identity, versions, operating mode, reset |
//! | [`Spi`] | SPI controller |
//! | [`I2c`] | I2C controller |
//! | [`Gpio`] | IO pins and pin interrupts |
//! | [`OneWire`] | 1-Wire controller |

pub mod device;
pub mod gpio;
pub mod i2c;
pub mod onewire;
pub mod spi;

pub use binho_core::{Connection, Error, Result};
pub use device::{Device, OperationMode};
pub use gpio::{Edge, Gpio, Pin, PinMode};
pub use i2c::I2c;
pub use onewire::OneWire;
pub use spi::{BitOrder, Spi};

use std::str::FromStr;

use binho_core::Response;

/// Parse a reply payload, reporting the command on failure
pub(crate) fn parse_payload<T: FromStr>(command: &str, response: &Response) -> Result<T> {
    let payload = response.payload().unwrap_or_default();
    payload.trim().parse().map_err(|_| Error::InvalidPayload {
        command: command.to_string(),
        payload: payload.to_string(),
    })
}

/// Decode a hex reply payload; whitespace between bytes is ignored
pub(crate) fn decode_hex(command: &str, payload: &str) -> Result<Vec<u8>> {
    let digits: String = payload
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    hex::decode(digits).map_err(|_| Error::InvalidPayload {
        command: command.to_string(),
        payload: payload.to_string(),
    })
}

/// Hex field for a write payload; the firmware expects `0` for no data
pub(crate) fn encode_hex(data: &[u8]) -> String {
    if data.is_empty() {
        "0".to_string()
    } else {
        hex::encode_upper(data)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_hex_spaced_bytes() {
        assert_eq!(
            decode_hex("SPI0 TXRX 9F0000", "9F 00 00").unwrap(),
            [0x9F, 0x00, 0x00]
        );
        assert_eq!(decode_hex("SPI0 TXRX 9F", " 9f\t").unwrap(), [0x9F]);
    }

    #[test]
    fn test_decode_hex_rejects_odd_digits() {
        assert!(matches!(
            decode_hex("SPI0 TXRX 9F", "9F 0"),
            Err(Error::InvalidPayload { .. })
        ));
    }
}
