//! Connection configuration
//!
//! Settings can be built in code, parsed from a connection string of the
//! form `<port>[:key=value,...]`, or loaded from a TOML document:
//!
//! ```toml
//! port = "/dev/ttyACM0"
//! command_timeout_ms = 500
//! interrupt_queue_capacity = 128
//!
//! [identity]
//! vendor_id = 0x04D8
//! product_id = 0xED34
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// USB identity reported by the discovery layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceIdentity {
    /// USB vendor ID
    pub vendor_id: u16,
    /// USB product ID, if known
    #[serde(default)]
    pub product_id: Option<u16>,
}

/// Settings for one adapter connection
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionConfig {
    /// Serial port path (e.g. `/dev/ttyACM0`, `COM3`)
    pub port: String,
    /// Baud rate; ignored by USB CDC but required to open the port
    pub baud_rate: u32,
    /// Default deadline for a command's reply
    pub command_timeout_ms: u64,
    /// Deadline for the identity probe during open
    pub probe_timeout_ms: u64,
    /// How long the next caller waits for a timed-out command's late reply;
    /// at least `command_timeout_ms`
    pub late_reply_grace_ms: u64,
    /// Transport read timeout; bounds how quickly the dispatcher sees a stop request
    pub read_poll_ms: u64,
    /// Bounded wait for the dispatcher thread on close
    pub shutdown_join_ms: u64,
    /// Interrupt events buffered before the oldest is dropped
    pub interrupt_queue_capacity: usize,
    /// Identity of the device behind `port`, when discovery supplied one
    pub identity: Option<DeviceIdentity>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 115_200,
            command_timeout_ms: 1000,
            probe_timeout_ms: 500,
            late_reply_grace_ms: 1000,
            read_poll_ms: 20,
            shutdown_join_ms: 1000,
            interrupt_queue_capacity: 64,
            identity: None,
        }
    }
}

impl ConnectionConfig {
    /// Default settings for `port`
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Self::default()
        }
    }

    /// Parse a connection string
    ///
    /// Format: `port` or `port:key1=value1,key2=value2`. Recognised keys are
    /// `baud`, `timeout_ms`, `probe_timeout_ms`, `grace_ms`, `poll_ms`,
    /// `join_ms`, `queue`, `vid` and `pid`.
    ///
    /// # Example
    /// ```
    /// use binho_core::ConnectionConfig;
    ///
    /// let config = ConnectionConfig::parse("/dev/ttyACM0:timeout_ms=250,vid=0x04D8").unwrap();
    /// assert_eq!(config.port, "/dev/ttyACM0");
    /// assert_eq!(config.command_timeout_ms, 250);
    /// ```
    pub fn parse(s: &str) -> Result<Self> {
        let (port, opts) = s.split_once(':').unwrap_or((s, ""));
        let mut config = Self::new(port);
        let mut vendor_id = None;
        let mut product_id = None;

        for opt in opts.split(',').filter(|o| !o.is_empty()) {
            let (key, value) = opt
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("expected key=value, got '{}'", opt)))?;
            match key.trim() {
                "baud" => config.baud_rate = parse_number(key, value)?,
                "timeout_ms" => config.command_timeout_ms = parse_number(key, value)?,
                "probe_timeout_ms" => config.probe_timeout_ms = parse_number(key, value)?,
                "grace_ms" => config.late_reply_grace_ms = parse_number(key, value)?,
                "poll_ms" => config.read_poll_ms = parse_number(key, value)?,
                "join_ms" => config.shutdown_join_ms = parse_number(key, value)?,
                "queue" => config.interrupt_queue_capacity = parse_number(key, value)?,
                "vid" => vendor_id = Some(parse_number(key, value)?),
                "pid" => product_id = Some(parse_number(key, value)?),
                other => return Err(Error::Config(format!("unknown option '{}'", other))),
            }
        }

        match (vendor_id, product_id) {
            (Some(vendor_id), product_id) => {
                config.identity = Some(DeviceIdentity {
                    vendor_id,
                    product_id,
                })
            }
            (None, Some(_)) => return Err(Error::Config("pid given without vid".into())),
            (None, None) => {}
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse settings from a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load settings from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Check that all values are usable
    pub fn validate(&self) -> Result<()> {
        if self.port.is_empty() {
            return Err(Error::Config("port is empty".into()));
        }
        let nonzero = [
            ("baud_rate", u64::from(self.baud_rate)),
            ("command_timeout_ms", self.command_timeout_ms),
            ("probe_timeout_ms", self.probe_timeout_ms),
            ("read_poll_ms", self.read_poll_ms),
            ("shutdown_join_ms", self.shutdown_join_ms),
            ("interrupt_queue_capacity", self.interrupt_queue_capacity as u64),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                return Err(Error::Config(format!("{} must be non-zero", name)));
            }
        }
        if self.late_reply_grace_ms < self.command_timeout_ms {
            return Err(Error::Config(format!(
                "late_reply_grace_ms ({}) must be at least command_timeout_ms ({})",
                self.late_reply_grace_ms, self.command_timeout_ms
            )));
        }
        Ok(())
    }

    /// Default reply deadline
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Identity probe deadline
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Late reply grace window, never shorter than the command timeout
    pub fn late_reply_grace(&self) -> Duration {
        Duration::from_millis(self.late_reply_grace_ms.max(self.command_timeout_ms))
    }

    /// Transport read timeout
    pub fn read_poll(&self) -> Duration {
        Duration::from_millis(self.read_poll_ms)
    }

    /// Dispatcher join bound
    pub fn shutdown_join(&self) -> Duration {
        Duration::from_millis(self.shutdown_join_ms)
    }
}

/// Parse a decimal or `0x`-prefixed hex number
fn parse_number<T>(key: &str, value: &str) -> Result<T>
where
    T: TryFrom<u64>,
{
    let value = value.trim();
    let parsed = if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else {
        value.parse::<u64>()
    };
    parsed
        .ok()
        .and_then(|v| T::try_from(v).ok())
        .ok_or_else(|| Error::Config(format!("invalid value '{}' for {}", value, key)))
}
