// serial/port.rs
use async_trait::async_trait;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, StopBits};
use tracing::debug;

use super::{Connector, DeviceIo};
use crate::error::AppError;

/// Opens real tty devices (8N1, no flow control).
pub struct TtyConnector;

#[async_trait]
impl Connector for TtyConnector {
    async fn connect(&self, path: &str, baud_rate: u32) -> Result<Box<dyn DeviceIo>, AppError> {
        debug!(%path, baud_rate, "Opening serial device");
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()
            .map_err(|e| AppError::Connection(format!("{}: {}", path, e)))?;

        Ok(Box::new(port))
    }
}
