//! Transport binder: address strings in, channels out.
//!
//! The binder is the only component that reads resource strings. It parses
//! the interface prefix, picks the [`Transport`] registered for that bus kind
//! and wraps the resulting channel according to [`ChannelOptions`].
//!
//! | prefix  | transport                         |
//! |---------|-----------------------------------|
//! | `TCPIP` | [`TcpTransport`] (raw socket)      |
//! | `ASRL`  | `SerialTransport` (`serial` feature) |
//! | `GPIB`  | none bundled                       |
//! | `USB`   | none bundled                       |
//!
//! Virtual entries never reach a transport: [`TransportBinder::open_virtual`]
//! hands out a [`NullChannel`] without looking at the address.

pub mod address;
pub mod retry;
#[cfg(feature = "serial")]
pub mod serial;
pub mod stream;
pub mod tcp;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use labrig_core::{Channel, NullChannel, Result, RigError};
use serde::{Deserialize, Serialize};

pub use address::{InterfaceKind, ResourceAddress};
pub use retry::RetryChannel;
#[cfg(feature = "serial")]
pub use serial::SerialTransport;
pub use stream::StreamChannel;
pub use tcp::TcpTransport;

use crate::config::TransportSettings;

/// Default baud rate for `ASRL` resources.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Per-entry connection options (the `options` object of a config entry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelOptions {
    /// I/O timeout in milliseconds.
    pub timeout_ms: u64,
    /// Connect timeout in milliseconds.
    pub open_timeout_ms: u64,
    /// Extra attempts for each failed write, read or query.
    pub max_retries: u32,
    /// Flush stale input right after connecting.
    pub clear: bool,
    /// Query `*IDN?` after connecting.
    pub identify: bool,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 1000,
            open_timeout_ms: 1000,
            max_retries: 0,
            clear: false,
            identify: true,
        }
    }
}

/// Connects one bus kind.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a channel to `address`.
    ///
    /// # Errors
    /// `ChannelOpen` when the endpoint is unreachable or refuses.
    async fn connect(
        &self,
        address: &ResourceAddress,
        options: &ChannelOptions,
    ) -> Result<Box<dyn Channel>>;

    /// Send one group execute trigger on the bus `interface` to every
    /// device in `devices`.
    ///
    /// # Errors
    /// `Communication` when the transport has no group trigger, which is the
    /// default.
    async fn group_trigger(
        &self,
        interface: &ResourceAddress,
        _devices: &[ResourceAddress],
    ) -> Result<()> {
        Err(RigError::communication(
            interface.as_str(),
            format!("{} transport has no group execute trigger", interface.kind),
        ))
    }
}

/// Produces channels for addresses.
#[derive(Clone, Default)]
pub struct TransportBinder {
    transports: HashMap<InterfaceKind, Arc<dyn Transport>>,
}

impl TransportBinder {
    /// Binder with no transports; every physical open fails.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binder with the bundled TCP (and, with the `serial` feature, serial)
    /// transports.
    pub fn with_defaults(settings: &TransportSettings) -> Self {
        let binder = Self::new().with_transport(
            InterfaceKind::Tcpip,
            Arc::new(TcpTransport::new(settings.scpi_port)),
        );
        #[cfg(feature = "serial")]
        let binder = binder.with_transport(
            InterfaceKind::Asrl,
            Arc::new(SerialTransport::new(settings.baud_rate)),
        );
        binder
    }

    /// Register (or replace) the transport for `kind`.
    pub fn with_transport(mut self, kind: InterfaceKind, transport: Arc<dyn Transport>) -> Self {
        self.transports.insert(kind, transport);
        self
    }

    /// Whether `kind` has a transport.
    pub fn supports(&self, kind: InterfaceKind) -> bool {
        self.transports.contains_key(&kind)
    }

    /// Parse `address` without connecting.
    pub fn parse(&self, address: &str) -> Result<ResourceAddress> {
        ResourceAddress::parse(address)
    }

    /// Bus an address occupies, or `None` if it does not parse.
    pub fn bus_key(&self, address: &str) -> Option<String> {
        ResourceAddress::parse(address).ok().map(|a| a.bus_key())
    }

    /// Open a physical channel.
    ///
    /// # Errors
    /// `ChannelOpen` for unparseable addresses, bus kinds without a
    /// transport and refused connections; also when the post-connect clear
    /// fails.
    pub async fn open(&self, address: &str, options: &ChannelOptions) -> Result<Box<dyn Channel>> {
        let parsed = ResourceAddress::parse(address)?;
        let transport = self.transports.get(&parsed.kind).ok_or_else(|| {
            RigError::channel_open(
                address,
                format!("no transport registered for {} interfaces", parsed.kind),
            )
        })?;

        let mut channel = transport.connect(&parsed, options).await?;
        tracing::debug!(address, kind = %parsed.kind, "channel open");

        if options.clear {
            if let Err(e) = channel.clear().await {
                if let Err(close_err) = channel.close().await {
                    tracing::warn!(address, error = %close_err, "failed to close channel");
                }
                return Err(RigError::channel_open(address, format!("clear failed: {}", e)));
            }
        }

        if options.max_retries > 0 {
            channel = Box::new(RetryChannel::new(channel, options.max_retries));
        }
        Ok(channel)
    }

    /// Trigger several GPIB instruments at once through their interface
    /// (`GPIB<n>::INTFC`).
    ///
    /// # Errors
    /// - `InvalidArgument` if `interface` is not a GPIB interface address,
    ///   `devices` is empty or a device sits on another board
    /// - `ChannelOpen` for unparseable addresses or without a GPIB transport
    /// - whatever the transport reports for the trigger itself
    pub async fn group_trigger(&self, interface: &str, devices: &[&str]) -> Result<()> {
        const OPERATION: &str = "group_trigger";

        let bus = ResourceAddress::parse(interface)?;
        if bus.kind != InterfaceKind::Gpib || bus.resource_class != "INTFC" {
            return Err(RigError::invalid_argument(
                OPERATION,
                "interface",
                format!("expected GPIB<n>::INTFC, got {}", interface),
            ));
        }
        if devices.is_empty() {
            return Err(RigError::invalid_argument(OPERATION, "devices", "nothing to trigger"));
        }

        let bus_key = bus.bus_key();
        let mut targets = Vec::with_capacity(devices.len());
        for device in devices {
            let target = ResourceAddress::parse(device)?;
            if target.bus_key() != bus_key {
                return Err(RigError::invalid_argument(
                    OPERATION,
                    "devices",
                    format!("{} is not on {}", device, bus_key),
                ));
            }
            targets.push(target);
        }

        let transport = self.transports.get(&bus.kind).ok_or_else(|| {
            RigError::channel_open(
                interface,
                format!("no transport registered for {} interfaces", bus.kind),
            )
        })?;
        transport.group_trigger(&bus, &targets).await?;
        tracing::debug!(interface, devices = targets.len(), "group execute trigger sent");
        Ok(())
    }

    /// Channel for a virtual device: no I/O, address not parsed.
    pub fn open_virtual(&self, address: &str) -> Box<dyn Channel> {
        Box::new(NullChannel::new(address))
    }
}
