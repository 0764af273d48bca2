//! binho - Command line utility for Binho USB host adapters
//!
//! Opens one adapter through `binho-core`, runs a single command with the
//! protocol drivers from `binho-drivers`, and closes the port again. Ctrl-C
//! or SIGTERM close the connection as well, so the port is always released.

mod cli;
mod commands;
mod ports;

use std::sync::Arc;

use binho_core::OpenStatus;
use clap::Parser;
use cli::{Cli, Commands};

/// Exit status used when no usable adapter is found
const ENODEV: i32 = 19;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }
    if std::env::var_os("BINHO_NOVA_DEBUG").is_some() {
        log::set_max_level(log::LevelFilter::Trace);
    }

    let config = ports::resolve_config(cli.port.as_deref(), cli.config.as_deref())?;
    let conn = Arc::new(ports::connect(config));
    let _signal = conn.close_on_signal();

    log::debug!("Trying to find a Binho host adapter on {}...", conn.port());
    let info = match conn.open().await? {
        OpenStatus::Ready(info) => info,
        OpenStatus::NeedsFirmwareUpdate => {
            eprintln!(
                "Binho host adapter found on {}, but it cannot be used now because it's in DFU mode",
                conn.port()
            );
            conn.close();
            std::process::exit(ENODEV);
        }
        OpenStatus::NotFound => {
            eprintln!("No Binho host adapter found on {}!", conn.port());
            std::process::exit(ENODEV);
        }
    };

    let result = match &cli.command {
        Commands::Info => commands::info::run(&conn, &info).await,
        Commands::Gpio {
            iopin,
            mode,
            output,
        } => commands::gpio::run(&conn, iopin, mode, output.as_deref()).await,
        Commands::Spi { clock, mode, tx } => commands::spi::run(&conn, *clock, *mode, tx).await,
        Commands::I2cScan { pullups } => commands::i2c_scan::run(&conn, *pullups).await,
        Commands::Watch { iopin, edge } => commands::watch::run(&conn, iopin, edge).await,
    };

    // Close the port whether or not the command failed
    conn.close();
    result
}
