//! Port selection and connection setup
//!
//! The port argument is either a serial device path, optionally followed by
//! connection options, or the name of the emulated adapter.

use std::path::Path;

use binho_core::{Connection, ConnectionConfig};

/// Port name selecting the emulated adapter
#[cfg(feature = "dummy")]
pub const DUMMY_PORT: &str = "dummy";

/// Build connection settings from the `--config` file and `--port` argument
///
/// The file is read first; a port given on the command line replaces the
/// file's port and applies any options appended to it.
pub fn resolve_config(
    port: Option<&str>,
    config_file: Option<&Path>,
) -> Result<ConnectionConfig, Box<dyn std::error::Error>> {
    let mut config = match config_file {
        Some(path) => {
            log::debug!("Loading connection settings from {}", path.display());
            Some(ConnectionConfig::load(path)?)
        }
        None => None,
    };

    if let Some(port) = port {
        let from_arg = ConnectionConfig::parse(port)?;
        config = Some(match config {
            Some(file) if !port.contains(':') => ConnectionConfig {
                port: from_arg.port,
                ..file
            },
            _ => from_arg,
        });
    }

    config.ok_or_else(|| {
        "No adapter selected.\n\
         Usage: binho -p <port> <command> (e.g. -p /dev/ttyACM0, -p COM3, -p dummy)"
            .into()
    })
}

/// Create a closed connection for `config`
pub fn connect(config: ConnectionConfig) -> Connection {
    #[cfg(feature = "dummy")]
    if config.port == DUMMY_PORT {
        log::info!("Using emulated Binho Nova");
        let (transport, _adapter) = binho_dummy::DummyTransport::new_default();
        return Connection::new(config, Box::new(transport));
    }

    log::debug!("Using serial port {}", config.port);
    Connection::serial(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_argument() {
        let config = resolve_config(Some("/dev/ttyACM0:timeout_ms=50"), None).unwrap();
        assert_eq!(config.port, "/dev/ttyACM0");
        assert_eq!(config.command_timeout_ms, 50);
    }

    #[test]
    fn test_no_port() {
        assert!(resolve_config(None, None).is_err());
    }
}
