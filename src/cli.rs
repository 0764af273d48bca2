//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parse a string as a hex or decimal u32
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

#[derive(Parser)]
#[command(name = "binho")]
#[command(author, version, about = "Binho host adapter utility", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Connection settings file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Serial port of the adapter, e.g. /dev/ttyACM0 or COM3
    ///
    /// Options can be appended as PORT:key=value,... (baud, timeout_ms,
    /// probe_timeout_ms, grace_ms, poll_ms, join_ms, queue, vid, pid).
    /// Use "dummy" for an emulated adapter.
    #[arg(short, long, global = true)]
    pub port: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show device ID, firmware and hardware versions
    Info,

    /// Read or drive an IO pin
    Gpio {
        /// IO pin to use (number or IOn)
        #[arg(short = 'n', long, default_value = "IO0")]
        iopin: String,

        /// Mode of the IO pin
        #[arg(short, long, default_value = "DIN", value_parser = ["DIN", "DOUT"])]
        mode: String,

        /// Drive the pin as an output: 0, 1, LOW or HIGH
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Perform one SPI transfer
    Spi {
        /// Clock frequency in Hz
        #[arg(short, long, value_parser = parse_hex_u32)]
        clock: Option<u32>,

        /// SPI mode (0-3)
        #[arg(short, long, default_value_t = 0)]
        mode: u8,

        /// Bytes to send, as hex
        #[arg(long)]
        tx: String,
    },

    /// List devices answering on the I2C bus
    I2cScan {
        /// Enable the on-board pull-up resistors
        #[arg(long)]
        pullups: bool,
    },

    /// Print interrupts from an IO pin until interrupted
    Watch {
        /// IO pin to watch (number or IOn)
        #[arg(short = 'n', long, default_value = "IO0")]
        iopin: String,

        /// Edge that raises an interrupt
        #[arg(short, long, default_value = "CHANGE", value_parser = ["RISE", "FALL", "CHANGE"])]
        edge: String,
    },
}
