//! Emulated Nova firmware
//!
//! [`DummyNova`] answers one command line at a time with the reply lines the
//! real firmware would send. It keeps enough state (operating mode, SPI
//! settings, IO pins, an I2C EEPROM and a 1-Wire device) for the drivers to
//! be exercised end to end.

use std::collections::BTreeMap;

/// Error reply sent by the firmware for malformed or rejected commands
pub const NG: &str = "-NG";

const OK: &str = "-OK";

/// Configuration for the emulated adapter
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// Device ID returned by `+ID`
    pub device_id: String,
    /// Firmware version returned by `+FWVER`
    pub firmware_version: String,
    /// Hardware version returned by `+HWVER`
    pub hardware_version: String,
    /// Command set version returned by `+CMDVER`
    pub command_version: String,
    /// Number of IO pins
    pub io_pins: u8,
    /// I2C addresses that acknowledge, each backed by a 256-byte memory
    pub i2c_devices: Vec<u8>,
    /// ROM code of the device on the 1-Wire bus, if any
    pub one_wire_rom: Option<[u8; 8]>,
    /// Start in bootloader (DFU) mode, where no command is answered
    pub bootloader: bool,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            device_id: "0xC59BB495504E5336362E3120FF042D2C".into(),
            firmware_version: "0.2.8".into(),
            hardware_version: "1.0".into(),
            command_version: "1".into(),
            io_pins: 5,
            i2c_devices: vec![0x50],
            one_wire_rom: Some([0x28, 0xFF, 0x64, 0x1E, 0x0F, 0x19, 0x3C, 0x4B]),
            bootloader: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Pin {
    mode: String,
    level: u8,
    edge: Option<String>,
}

#[derive(Debug, Clone)]
struct Spi {
    clock: u32,
    order: String,
    mode: u8,
    bits: u8,
    begun: bool,
}

impl Default for Spi {
    fn default() -> Self {
        Self {
            clock: 2_000_000,
            order: "MSBFIRST".into(),
            mode: 0,
            bits: 8,
            begun: false,
        }
    }
}

#[derive(Debug, Clone)]
struct I2cDevice {
    memory: Vec<u8>,
    pointer: u8,
}

/// Emulated adapter state
#[derive(Debug, Clone)]
pub struct DummyNova {
    config: DummyConfig,
    mode: String,
    spi: Spi,
    pins: Vec<Pin>,
    i2c_frequency: u32,
    i2c_pullups: bool,
    i2c: BTreeMap<u8, I2cDevice>,
    one_wire_pin: Option<u8>,
    one_wire_scratchpad: Vec<u8>,
    bootloader: bool,
}

impl DummyNova {
    /// Create an adapter in IO mode with all pins as digital inputs
    pub fn new(config: DummyConfig) -> Self {
        let pins = (0..config.io_pins)
            .map(|_| Pin {
                mode: "DIN".into(),
                ..Pin::default()
            })
            .collect();
        let i2c = config
            .i2c_devices
            .iter()
            .map(|&addr| {
                (
                    addr,
                    I2cDevice {
                        memory: vec![0xFF; 256],
                        pointer: 0,
                    },
                )
            })
            .collect();
        Self {
            bootloader: config.bootloader,
            config,
            mode: "IO".into(),
            spi: Spi::default(),
            pins,
            i2c_frequency: 400_000,
            i2c_pullups: false,
            i2c,
            one_wire_pin: None,
            one_wire_scratchpad: vec![0; 9],
        }
    }

    /// Configuration the adapter was created with
    pub fn config(&self) -> &DummyConfig {
        &self.config
    }

    /// Whether the adapter is in bootloader mode
    pub fn in_bootloader(&self) -> bool {
        self.bootloader
    }

    /// Current operating mode
    pub fn operation_mode(&self) -> &str {
        &self.mode
    }

    /// Level of an IO pin
    pub fn pin_level(&self, pin: u8) -> Option<u8> {
        self.pins.get(usize::from(pin)).map(|p| p.level)
    }

    /// Contents of the memory behind an emulated I2C device
    pub fn i2c_memory(&self, address: u8) -> Option<&[u8]> {
        self.i2c.get(&address).map(|d| d.memory.as_slice())
    }

    /// Drive an input pin from the outside
    ///
    /// Returns the interrupt line the firmware emits if the change matches
    /// the pin's armed edge.
    pub fn drive_input(&mut self, pin: u8, level: u8) -> Option<String> {
        let p = self.pins.get_mut(usize::from(pin))?;
        let previous = p.level;
        p.level = u8::from(level != 0);
        if previous == p.level {
            return None;
        }
        let fires = match p.edge.as_deref() {
            Some("RISE") => p.level == 1,
            Some("FALL") => p.level == 0,
            Some("CHANGE") => true,
            _ => false,
        };
        fires.then(|| format!("!IO{} {}", pin, p.level))
    }

    /// Answer one command line
    ///
    /// Returns the lines the firmware sends back, without terminators. In
    /// bootloader mode nothing is answered.
    pub fn handle(&mut self, line: &str) -> Vec<String> {
        if self.bootloader {
            log::debug!("dummy: in bootloader, ignoring '{}'", line);
            return Vec::new();
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some((&head, args)) = tokens.split_first() else {
            return vec![NG.into()];
        };

        let reply = if let Some(cmd) = head.strip_prefix('+') {
            self.handle_core(cmd, args)
        } else if head == "SPI0" {
            self.handle_spi(args)
        } else if head == "I2C0" {
            self.handle_i2c(args)
        } else if head == "1WIRE0" {
            self.handle_one_wire(args)
        } else if let Some(pin) = head.strip_prefix("IO").and_then(|n| n.parse::<u8>().ok()) {
            self.handle_io(pin, args)
        } else {
            None
        };

        let reply = reply.unwrap_or_else(|| NG.to_string());
        log::trace!("dummy: '{}' -> '{}'", line, reply);
        vec![reply]
    }

    fn handle_core(&mut self, cmd: &str, args: &[&str]) -> Option<String> {
        match (cmd, args) {
            ("ID", []) => Some(format!("-ID {}", self.config.device_id)),
            ("FWVER", []) => Some(format!("-FWVER {}", self.config.firmware_version)),
            ("HWVER", []) => Some(format!("-HWVER {}", self.config.hardware_version)),
            ("CMDVER", []) => Some(format!("-CMDVER {}", self.config.command_version)),
            ("PING", []) => Some(OK.into()),
            ("RESET", []) => {
                let config = self.config.clone();
                *self = Self::new(config);
                Some(OK.into())
            }
            ("BTL", []) => {
                self.bootloader = true;
                Some(OK.into())
            }
            ("MODE", ["0", "?"]) => Some(format!("-MODE 0 {}", self.mode)),
            ("MODE", ["0", mode]) => {
                if !["IO", "I2C", "SPI", "1WIRE", "UART", "SWI"].contains(mode) {
                    return None;
                }
                self.mode = mode.to_string();
                self.spi.begun = false;
                Some(OK.into())
            }
            _ => None,
        }
    }

    fn handle_spi(&mut self, args: &[&str]) -> Option<String> {
        let spi = &mut self.spi;
        match args {
            ["CLK", "?"] => Some(format!("-SPI0 CLK {}", spi.clock)),
            ["CLK", hz] => {
                spi.clock = hz.parse().ok().filter(|&hz| (500_000..=12_000_000).contains(&hz))?;
                Some(OK.into())
            }
            ["ORDER", "?"] => Some(format!("-SPI0 ORDER {}", spi.order)),
            ["ORDER", order @ ("MSBFIRST" | "LSBFIRST")] => {
                spi.order = order.to_string();
                Some(OK.into())
            }
            ["MODE", "?"] => Some(format!("-SPI0 MODE {}", spi.mode)),
            ["MODE", mode] => {
                spi.mode = mode.parse().ok().filter(|&m| m <= 3)?;
                Some(OK.into())
            }
            ["TXBITS", "?"] => Some(format!("-SPI0 TXBITS {}", spi.bits)),
            ["TXBITS", bits @ ("8" | "16")] => {
                spi.bits = bits.parse().ok()?;
                Some(OK.into())
            }
            ["BEGIN"] => {
                if self.mode != "SPI" || spi.begun {
                    return None;
                }
                spi.begun = true;
                Some(OK.into())
            }
            ["END"] => {
                if !spi.begun {
                    return None;
                }
                spi.begun = false;
                Some(OK.into())
            }
            ["TXRX", data] => {
                if !spi.begun {
                    return None;
                }
                // MOSI is looped back to MISO
                let bytes = hex::decode(data).ok()?;
                Some(format!("-SPI0 RXD {}", hex::encode_upper(bytes)))
            }
            ["WHR", write_only, count, data] => {
                if !spi.begun {
                    return None;
                }
                let count: usize = count.parse().ok()?;
                let bytes = if *data == "0" {
                    vec![0; count]
                } else {
                    hex::decode(data).ok()?
                };
                if bytes.len() != count {
                    return None;
                }
                match *write_only {
                    "1" => Some(OK.into()),
                    "0" => Some(format!("-SPI0 RXD {}", hex::encode_upper(bytes))),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn handle_i2c(&mut self, args: &[&str]) -> Option<String> {
        match args {
            ["FREQ", "?"] => Some(format!("-I2C0 FREQ {}", self.i2c_frequency)),
            ["FREQ", hz] => {
                self.i2c_frequency = hz.parse().ok().filter(|&hz| (100_000..=3_400_000).contains(&hz))?;
                Some(OK.into())
            }
            ["PULL", "?"] => Some(format!("-I2C0 PULL {}", u8::from(self.i2c_pullups))),
            ["PULL", enable @ ("0" | "1")] => {
                self.i2c_pullups = *enable == "1";
                Some(OK.into())
            }
            ["SCAN", address] => {
                if self.mode != "I2C" {
                    return None;
                }
                let addr = parse_address(address)?;
                let status = if self.i2c.contains_key(&addr) { "OK" } else { "NACK" };
                Some(format!("-I2C0 SCAN 0x{:02X} {}", addr, status))
            }
            ["WHR", address, read_len, write_len, data] => {
                if self.mode != "I2C" {
                    return None;
                }
                let addr = parse_address(address)?;
                let read_len: usize = read_len.parse().ok()?;
                let write_len: usize = write_len.parse().ok()?;
                let written = if write_len == 0 {
                    Vec::new()
                } else {
                    hex::decode(data).ok()?
                };
                if written.len() != write_len {
                    return None;
                }
                let device = self.i2c.get_mut(&addr)?;
                if let Some((&pointer, payload)) = written.split_first() {
                    device.pointer = pointer;
                    for &byte in payload {
                        device.memory[usize::from(device.pointer)] = byte;
                        device.pointer = device.pointer.wrapping_add(1);
                    }
                }
                if read_len == 0 {
                    return Some(OK.into());
                }
                let read: Vec<u8> = (0..read_len)
                    .map(|_| {
                        let byte = device.memory[usize::from(device.pointer)];
                        device.pointer = device.pointer.wrapping_add(1);
                        byte
                    })
                    .collect();
                Some(format!("-I2C0 RXD {}", hex::encode_upper(read)))
            }
            _ => None,
        }
    }

    fn handle_one_wire(&mut self, args: &[&str]) -> Option<String> {
        match args {
            ["BEGIN", pin] => {
                let pin: u8 = pin.parse().ok().filter(|&p| p < self.config.io_pins)?;
                self.one_wire_pin = Some(pin);
                Some(OK.into())
            }
            ["RESET"] => {
                self.one_wire_pin?;
                Some(OK.into())
            }
            ["SEARCH"] => {
                self.one_wire_pin?;
                Some(match self.config.one_wire_rom {
                    Some(rom) => format!("-1WIRE0 ADDR {}", hex::encode_upper(rom)),
                    None => "-1WIRE0 ADDR NONE".into(),
                })
            }
            ["WHR", "0" | "1", read_len, write_len, data] => {
                self.one_wire_pin?;
                self.config.one_wire_rom?;
                let read_len: usize = read_len.parse().ok()?;
                let write_len: usize = write_len.parse().ok()?;
                let written = if write_len == 0 {
                    Vec::new()
                } else {
                    hex::decode(data).ok()?
                };
                if written.len() != write_len {
                    return None;
                }
                // Write Scratchpad (0x4E) stores the bytes that follow
                if let Some((&0x4E, payload)) = written.split_first() {
                    for (slot, &byte) in self.one_wire_scratchpad.iter_mut().zip(payload) {
                        *slot = byte;
                    }
                }
                if read_len == 0 {
                    return Some(OK.into());
                }
                let read: Vec<u8> = self
                    .one_wire_scratchpad
                    .iter()
                    .copied()
                    .chain(std::iter::repeat(0xFF))
                    .take(read_len)
                    .collect();
                Some(format!("-1WIRE0 RXD {}", hex::encode_upper(read)))
            }
            _ => None,
        }
    }

    fn handle_io(&mut self, pin: u8, args: &[&str]) -> Option<String> {
        let p = self.pins.get_mut(usize::from(pin))?;
        match args {
            ["MODE", "?"] => Some(format!("-IO{} MODE {}", pin, p.mode)),
            ["MODE", mode @ ("DIN" | "DOUT" | "AIN" | "AOUT" | "PWM")] => {
                p.mode = mode.to_string();
                Some(OK.into())
            }
            ["VALUE", "?"] => Some(format!("-IO{} VALUE {}", pin, p.level)),
            ["VALUE", value @ ("0" | "1")] => {
                if p.mode != "DOUT" {
                    return None;
                }
                p.level = u8::from(*value == "1");
                Some(OK.into())
            }
            ["INT", "?"] => Some(format!(
                "-IO{} INT {}",
                pin,
                p.edge.as_deref().unwrap_or("NONE")
            )),
            ["INT", edge @ ("RISE" | "FALL" | "CHANGE")] => {
                p.edge = Some(edge.to_string());
                Some(OK.into())
            }
            ["INT", "NONE"] => {
                p.edge = None;
                Some(OK.into())
            }
            _ => None,
        }
    }
}

impl Default for DummyNova {
    fn default() -> Self {
        Self::new(DummyConfig::default())
    }
}

fn parse_address(s: &str) -> Option<u8> {
    let hex = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))?;
    u8::from_str_radix(hex, 16).ok().filter(|&a| a < 0x80)
}
