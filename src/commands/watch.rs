//! Watch command implementation
//!
//! Arms a pin interrupt and prints events from the connection's interrupt
//! queue. The queue ends when the connection is closed, which the signal
//! watcher does on Ctrl-C.

use binho_core::Connection;
use binho_drivers::{Device, Edge, Gpio, OperationMode, PinMode};

use super::CommandResult;

pub async fn run(conn: &Connection, iopin: &str, edge: &str) -> CommandResult {
    let edge: Edge = edge.parse()?;

    Device::new(conn)
        .set_operation_mode(OperationMode::Io)
        .await?;
    let pin = Gpio::new(conn)?.pin(iopin)?;
    pin.set_mode(PinMode::DigitalIn).await?;
    pin.set_interrupt(edge).await?;

    println!("Watching {} for {} edges, press Ctrl-C to stop", pin.name(), edge);
    let started = std::time::Instant::now();
    while let Some(event) = conn.next_interrupt().await {
        println!(
            "[{:>10.3}s] {} {}",
            event.timestamp.duration_since(started).as_secs_f64(),
            event.source,
            event.value
        );
    }

    let dropped = conn.dropped_interrupts();
    if dropped > 0 {
        log::warn!("{} interrupts were dropped", dropped);
    }
    Ok(())
}
