//! Info command implementation

use binho_core::{Connection, DeviceInfo};
use binho_drivers::Device;

use super::CommandResult;

/// Print identity and versions of the adapter
pub async fn run(conn: &Connection, info: &DeviceInfo) -> CommandResult {
    let device = Device::new(conn);

    println!("{} on {}", info.variant.product_name(), conn.port());
    println!("  Device ID:        {}", info.device_id);
    println!("  Firmware version: {}", device.firmware_version().await?);
    println!("  Hardware version: {}", device.hardware_version().await?);
    println!("  Command version:  {}", device.command_version().await?);
    println!("  Operating mode:   {}", device.operation_mode().await?);
    println!("  IO pins:          {}", info.io_pins);

    let apis: Vec<String> = info
        .capabilities
        .iter_names()
        .map(|(name, _)| name.to_string())
        .collect();
    println!("  APIs:             {}", apis.join(", "));
    Ok(())
}
