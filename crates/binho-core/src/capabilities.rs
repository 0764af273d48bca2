//! Adapter variants and the APIs they expose
//!
//! The capability set is resolved once during `open()` from the USB
//! identity the discovery layer reported, and drivers check it before
//! issuing commands.

use bitflags::bitflags;

use crate::config::DeviceIdentity;
use crate::error::{Error, Result};

/// USB vendor ID shared by all Binho adapters
pub const BINHO_VENDOR_ID: u16 = 0x04D8;

/// USB product ID of the Binho Nova
pub const NOVA_PRODUCT_ID: u16 = 0xED34;

/// Number of IO pins on the Nova (`IO0`..`IO4`)
pub const NOVA_IO_PINS: u8 = 5;

bitflags! {
    /// Protocol APIs exposed by an adapter
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u16 {
        /// Identity, mode selection, reset (`+` commands)
        const CORE     = 1 << 0;
        /// I2C controller
        const I2C      = 1 << 1;
        /// SPI controller
        const SPI      = 1 << 2;
        /// 1-Wire controller
        const ONE_WIRE = 1 << 3;
        /// General purpose IO pins
        const GPIO     = 1 << 4;
        /// UART bridge
        const UART     = 1 << 5;
        /// Atmel single-wire interface
        const SWI      = 1 << 6;
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Capabilities::CORE
    }
}

/// Known adapter models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterVariant {
    /// Binho Nova multi-protocol host adapter
    Nova,
    /// A Binho device with an unrecognised product ID
    Generic,
}

impl AdapterVariant {
    /// Pick the variant for a discovered identity
    ///
    /// Without a product ID the adapter is assumed to be a Nova, the only
    /// model speaking this protocol.
    pub fn from_identity(identity: Option<&DeviceIdentity>) -> Self {
        match identity.and_then(|id| id.product_id) {
            None | Some(NOVA_PRODUCT_ID) => AdapterVariant::Nova,
            Some(_) => AdapterVariant::Generic,
        }
    }

    /// Marketing name of the variant
    pub fn product_name(self) -> &'static str {
        match self {
            AdapterVariant::Nova => "Binho Nova",
            AdapterVariant::Generic => "Binho host adapter",
        }
    }

    /// APIs the variant exposes
    pub fn capabilities(self) -> Capabilities {
        match self {
            AdapterVariant::Nova => {
                Capabilities::CORE
                    | Capabilities::I2C
                    | Capabilities::SPI
                    | Capabilities::ONE_WIRE
                    | Capabilities::GPIO
            }
            AdapterVariant::Generic => Capabilities::CORE,
        }
    }

    /// Number of IO pins
    pub fn io_pins(self) -> u8 {
        match self {
            AdapterVariant::Nova => NOVA_IO_PINS,
            AdapterVariant::Generic => 0,
        }
    }
}

/// Identity and feature set of an opened adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Device ID reported by the firmware (`+ID`)
    pub device_id: String,
    /// Adapter model
    pub variant: AdapterVariant,
    /// APIs available on this adapter
    pub capabilities: Capabilities,
    /// Number of IO pins
    pub io_pins: u8,
}

impl DeviceInfo {
    /// Build the info for a probed adapter
    pub fn new(device_id: impl Into<String>, variant: AdapterVariant) -> Self {
        Self {
            device_id: device_id.into(),
            variant,
            capabilities: variant.capabilities(),
            io_pins: variant.io_pins(),
        }
    }

    /// Fail with [`Error::Unsupported`] unless all of `required` are present
    pub fn require(&self, required: Capabilities) -> Result<()> {
        let missing = required - self.capabilities;
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::Unsupported(missing))
        }
    }
}

/// Whether the discovered identity belongs to a Binho adapter
pub fn accepts_identity(identity: Option<&DeviceIdentity>) -> bool {
    identity.map_or(true, |id| id.vendor_id == BINHO_VENDOR_ID)
}
