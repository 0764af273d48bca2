//! I2C scan command implementation

use binho_core::Connection;
use binho_drivers::i2c::{SCAN_FIRST, SCAN_LAST};
use binho_drivers::{Device, I2c, OperationMode};

use super::CommandResult;

pub async fn run(conn: &Connection, pullups: bool) -> CommandResult {
    Device::new(conn)
        .set_operation_mode(OperationMode::I2c)
        .await?;
    let i2c = I2c::new(conn)?;
    i2c.set_pullups(pullups).await?;

    log::info!(
        "Scanning I2C addresses 0x{:02X}-0x{:02X}...",
        SCAN_FIRST,
        SCAN_LAST
    );
    let found = i2c.scan().await?;
    if found.is_empty() {
        println!("No I2C devices found.");
        return Ok(());
    }

    println!("Found {} I2C device(s):", found.len());
    for address in found {
        println!("  0x{:02X}", address);
    }
    Ok(())
}
