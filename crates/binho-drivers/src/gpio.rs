//! IO pin driver
//!
//! Pins are addressed as `IO0`..`IO<n-1>` where `n` is the adapter's pin
//! count. The adapter must be in IO operating mode for pin commands to take
//! effect.

use std::fmt;
use std::str::FromStr;

use binho_core::{Capabilities, Connection, Error, InterruptEvent, Result, ACK};

use crate::parse_payload;

/// Function assigned to a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PinMode {
    DigitalIn,
    DigitalOut,
    AnalogIn,
    AnalogOut,
    Pwm,
}

impl PinMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PinMode::DigitalIn => "DIN",
            PinMode::DigitalOut => "DOUT",
            PinMode::AnalogIn => "AIN",
            PinMode::AnalogOut => "AOUT",
            PinMode::Pwm => "PWM",
        }
    }
}

impl fmt::Display for PinMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PinMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "DIN" => Ok(PinMode::DigitalIn),
            "DOUT" => Ok(PinMode::DigitalOut),
            "AIN" => Ok(PinMode::AnalogIn),
            "AOUT" => Ok(PinMode::AnalogOut),
            "PWM" => Ok(PinMode::Pwm),
            _ => Err(Error::InvalidArgument(format!("unknown pin mode '{}'", s))),
        }
    }
}

/// Signal edge that raises a pin interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    Rise,
    Fall,
    Change,
    /// Interrupt disabled
    None,
}

impl Edge {
    pub fn as_str(self) -> &'static str {
        match self {
            Edge::Rise => "RISE",
            Edge::Fall => "FALL",
            Edge::Change => "CHANGE",
            Edge::None => "NONE",
        }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Edge {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "RISE" | "RISING" => Ok(Edge::Rise),
            "FALL" | "FALLING" => Ok(Edge::Fall),
            "CHANGE" | "BOTH" => Ok(Edge::Change),
            "NONE" => Ok(Edge::None),
            _ => Err(Error::InvalidArgument(format!("unknown edge '{}'", s))),
        }
    }
}

/// Parse a pin given as `3`, `IO3` or `io3`
pub fn parse_pin(s: &str, pin_count: u8) -> Result<u8> {
    let upper = s.trim().to_ascii_uppercase();
    let digits = upper.strip_prefix("IO").unwrap_or(&upper);
    let pin: u8 = digits
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("invalid pin '{}'", s)))?;
    if pin >= pin_count {
        return Err(Error::InvalidArgument(format!(
            "pin {} out of range, adapter has IO0-IO{}",
            s,
            pin_count.saturating_sub(1)
        )));
    }
    Ok(pin)
}

/// Parse an output level given as `0`, `1`, `LOW` or `HIGH`
pub fn parse_level(s: &str) -> Result<u8> {
    match s.trim().to_ascii_uppercase().as_str() {
        "0" | "LOW" => Ok(0),
        "1" | "HIGH" => Ok(1),
        _ => Err(Error::InvalidArgument(format!(
            "output can only be 0/1 or LOW/HIGH, not {}",
            s
        ))),
    }
}

/// The adapter's IO pins
pub struct Gpio<'a> {
    conn: &'a Connection,
    pin_count: u8,
}

impl<'a> Gpio<'a> {
    pub fn new(conn: &'a Connection) -> Result<Self> {
        let info = conn.require(Capabilities::GPIO)?;
        Ok(Self {
            conn,
            pin_count: info.io_pins,
        })
    }

    /// Number of IO pins
    pub fn pin_count(&self) -> u8 {
        self.pin_count
    }

    /// Look up a pin by name (`IO3`) or number (`3`)
    pub fn pin(&self, name: &str) -> Result<Pin<'a>> {
        let number = parse_pin(name, self.pin_count)?;
        Ok(Pin {
            conn: self.conn,
            number,
        })
    }

    /// Look up a pin by number
    pub fn pin_number(&self, number: u8) -> Result<Pin<'a>> {
        self.pin(&number.to_string())
    }
}

/// One IO pin
pub struct Pin<'a> {
    conn: &'a Connection,
    number: u8,
}

impl Pin<'_> {
    pub fn number(&self) -> u8 {
        self.number
    }

    /// Wire name, also the interrupt source tag
    pub fn name(&self) -> String {
        format!("IO{}", self.number)
    }

    pub async fn mode(&self) -> Result<PinMode> {
        let command = format!("{} MODE ?", self.name());
        let response = self
            .conn
            .request(&command, &format!("-{} MODE", self.name()))
            .await?;
        parse_payload(&command, &response)
    }

    pub async fn set_mode(&self, mode: PinMode) -> Result<()> {
        self.conn
            .request(&format!("{} MODE {}", self.name(), mode), ACK)
            .await
            .map(drop)
    }

    /// Current level; for analog inputs the raw converter reading
    pub async fn value(&self) -> Result<u16> {
        let command = format!("{} VALUE ?", self.name());
        let response = self
            .conn
            .request(&command, &format!("-{} VALUE", self.name()))
            .await?;
        parse_payload(&command, &response)
    }

    /// Drive a digital output low (0) or high (1)
    pub async fn set_value(&self, level: u8) -> Result<()> {
        if level > 1 {
            return Err(Error::InvalidArgument(format!(
                "output can only be set to 0 or 1, not {}",
                level
            )));
        }
        self.conn
            .request(&format!("{} VALUE {}", self.name(), level), ACK)
            .await
            .map(drop)
    }

    /// Arm (or with [`Edge::None`] disarm) the pin interrupt
    pub async fn set_interrupt(&self, edge: Edge) -> Result<()> {
        self.conn
            .request(&format!("{} INT {}", self.name(), edge), ACK)
            .await
            .map(drop)
    }

    /// Call `handler` on the dispatcher thread for each interrupt on this pin
    ///
    /// Without a handler, events go to the connection's interrupt queue.
    pub fn on_interrupt<F>(&self, handler: F)
    where
        F: Fn(&InterruptEvent) + Send + Sync + 'static,
    {
        self.conn.register_interrupt_handler(self.name(), handler);
    }

    /// Send this pin's interrupts back to the queue
    pub fn clear_interrupt_handler(&self) -> bool {
        self.conn.unregister_interrupt_handler(&self.name())
    }
}
