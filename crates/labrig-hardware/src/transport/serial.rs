//! Serial (`ASRL`) transport over `tokio-serial`.

use std::time::Duration;

use async_trait::async_trait;
use labrig_core::{Channel, Result, RigError};

use super::address::ResourceAddress;
use super::stream::StreamChannel;
use super::{ChannelOptions, Transport, DEFAULT_BAUD_RATE};

/// Opens `ASRL` addresses as 8N1 serial ports.
#[derive(Debug, Clone)]
pub struct SerialTransport {
    baud_rate: u32,
}

impl Default for SerialTransport {
    fn default() -> Self {
        Self::new(DEFAULT_BAUD_RATE)
    }
}

impl SerialTransport {
    /// Transport using `baud_rate` for every port.
    pub fn new(baud_rate: u32) -> Self {
        Self { baud_rate }
    }
}

/// Device path for an `ASRL` board.
///
/// `ASRL3` is `COM3` on Windows and `/dev/ttyS2` elsewhere; a board that is
/// not a number (`ASRL/dev/ttyUSB0`) is used as the path verbatim.
pub fn port_path(address: &ResourceAddress) -> Result<String> {
    let Ok(number) = address.board.parse::<u32>() else {
        return Ok(address.board.clone());
    };
    if cfg!(windows) {
        return Ok(format!("COM{}", number));
    }
    number
        .checked_sub(1)
        .map(|index| format!("/dev/ttyS{}", index))
        .ok_or_else(|| RigError::channel_open(address.as_str(), "serial ports are numbered from 1"))
}

/// `ASRL` addresses for every serial port the OS reports.
pub fn available_addresses() -> Vec<String> {
    match serialport::available_ports() {
        Ok(ports) => ports
            .into_iter()
            .map(|port| format!("ASRL{}::INSTR", port.port_name))
            .collect(),
        Err(e) => {
            tracing::warn!(error = %e, "could not enumerate serial ports");
            Vec::new()
        }
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn connect(
        &self,
        address: &ResourceAddress,
        options: &ChannelOptions,
    ) -> Result<Box<dyn Channel>> {
        use tokio::task::spawn_blocking;
        use tokio_serial::SerialPortBuilderExt;

        let path = port_path(address)?;
        let baud_rate = self.baud_rate;
        let open_timeout = Duration::from_millis(options.open_timeout_ms);
        tracing::debug!(address = %address, path = %path, baud_rate, "opening serial port");

        let path_owned = path.clone();
        let opened = spawn_blocking(move || {
            tokio_serial::new(&path_owned, baud_rate)
                .data_bits(tokio_serial::DataBits::Eight)
                .parity(tokio_serial::Parity::None)
                .stop_bits(tokio_serial::StopBits::One)
                .flow_control(tokio_serial::FlowControl::None)
                .timeout(open_timeout)
                .open_native_async()
        })
        .await
        .map_err(|e| RigError::channel_open(address.as_str(), e.to_string()))?;

        let port = opened.map_err(|e| {
            RigError::channel_open(address.as_str(), format!("{}: {}", path, e))
        })?;

        Ok(Box::new(StreamChannel::new(
            address.as_str(),
            port,
            Duration::from_millis(options.timeout_ms),
        )))
    }
}
