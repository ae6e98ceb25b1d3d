//! Raw-socket LAN transport.
//!
//! `TCPIP<n>::<host>::<port>::SOCKET` connects to the given port.
//! `TCPIP<n>::<host>::<device>::INSTR` connects to the instrument's raw SCPI
//! port (5025 unless configured otherwise); VXI-11 is not spoken.

use std::time::Duration;

use async_trait::async_trait;
use labrig_core::{Channel, Result, RigError};
use tokio::net::TcpStream;

use super::address::ResourceAddress;
use super::stream::StreamChannel;
use super::{ChannelOptions, Transport};

/// Default raw SCPI socket port used by LXI instruments.
pub const DEFAULT_SCPI_PORT: u16 = 5025;

/// Connects `TCPIP` addresses over plain TCP.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    scpi_port: u16,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(DEFAULT_SCPI_PORT)
    }
}

impl TcpTransport {
    /// Transport connecting `INSTR` resources to `scpi_port`.
    pub fn new(scpi_port: u16) -> Self {
        Self { scpi_port }
    }

    /// Host and port an address resolves to.
    pub fn endpoint(&self, address: &ResourceAddress) -> Result<(String, u16)> {
        let host = address
            .segments
            .first()
            .ok_or_else(|| RigError::channel_open(address.as_str(), "missing host"))?
            .clone();

        let port = match address.resource_class.as_str() {
            "SOCKET" => {
                let raw = address.segments.get(1).ok_or_else(|| {
                    RigError::channel_open(address.as_str(), "SOCKET resource needs a port")
                })?;
                raw.parse::<u16>().map_err(|_| {
                    RigError::channel_open(address.as_str(), format!("invalid port '{}'", raw))
                })?
            }
            _ => self.scpi_port,
        };
        Ok((host, port))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(
        &self,
        address: &ResourceAddress,
        options: &ChannelOptions,
    ) -> Result<Box<dyn Channel>> {
        let (host, port) = self.endpoint(address)?;
        let open_timeout = Duration::from_millis(options.open_timeout_ms);

        tracing::debug!(address = %address, host = %host, port, "connecting");
        let connect = TcpStream::connect((host.as_str(), port));
        let stream = match tokio::time::timeout(open_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(RigError::channel_open(address.as_str(), e.to_string())),
            Err(_) => {
                return Err(RigError::channel_open(
                    address.as_str(),
                    format!("connect timed out after {} ms", options.open_timeout_ms),
                ))
            }
        };
        let _ = stream.set_nodelay(true);

        Ok(Box::new(StreamChannel::new(
            address.as_str(),
            stream,
            Duration::from_millis(options.timeout_ms),
        )))
    }
}
