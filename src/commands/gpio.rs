//! GPIO command implementation
//!
//! Reads an input pin, or configures it as an output and drives it.

use binho_core::Connection;
use binho_drivers::gpio::parse_level;
use binho_drivers::{Device, Gpio, OperationMode, PinMode};

use super::CommandResult;

pub async fn run(conn: &Connection, iopin: &str, mode: &str, output: Option<&str>) -> CommandResult {
    Device::new(conn)
        .set_operation_mode(OperationMode::Io)
        .await?;

    let pin = Gpio::new(conn)?.pin(iopin)?;
    let name = pin.name();

    if let Some(output) = output {
        let level = parse_level(output)?;
        pin.set_mode(PinMode::DigitalOut).await?;
        pin.set_value(level).await?;
        log::info!("Configured {} as a digital output = {}", name, level);
        return Ok(());
    }

    let mode: PinMode = mode.parse()?;
    pin.set_mode(mode).await?;
    match pin.value().await? {
        0 => println!("{} is 0 (LOW)", name),
        1 => println!("{} is 1 (HIGH)", name),
        other => println!("{} is {}", name, other),
    }
    Ok(())
}
