//! SPI command implementation

use binho_core::{Connection, Error};
use binho_drivers::{Device, OperationMode, Spi};

use super::CommandResult;

/// Configure SPI0, send `tx` and print the bytes clocked in
pub async fn run(conn: &Connection, clock: Option<u32>, mode: u8, tx: &str) -> CommandResult {
    let data = hex::decode(tx.trim_start_matches("0x"))
        .map_err(|e| Error::InvalidArgument(format!("--tx is not hex: {}", e)))?;

    Device::new(conn)
        .set_operation_mode(OperationMode::Spi)
        .await?;
    let spi = Spi::new(conn)?;
    if let Some(hz) = clock {
        spi.set_clock_frequency(hz).await?;
    }
    spi.set_mode(mode).await?;

    spi.begin().await?;
    let result = spi.transfer(&data).await;
    spi.end(true).await?;
    let rx = result?;

    log::debug!("SPI clock {} Hz, mode {}", spi.clock_frequency().await?, mode);
    println!("TX: {}", hex::encode_upper(&data));
    println!("RX: {}", hex::encode_upper(&rx));
    Ok(())
}
