//! Instrument resource-string grammar.
//!
//! ```text
//! <INTERFACE><board>::<segment>::...::<CLASS>
//!
//! GPIB0::12::INSTR
//! GPIB0::INTFC
//! TCPIP0::192.168.0.10::inst0::INSTR
//! TCPIP0::192.168.0.10::5025::SOCKET
//! USB0::0x1234::0x5678::SN001::INSTR
//! ASRL3::INSTR
//! ASRL/dev/ttyUSB0::INSTR
//! ```
//!
//! Only the interface prefix, the board and the overall shape are checked
//! here. Whether a host resolves or a serial number exists is a transport
//! concern and surfaces when the channel is opened.

use std::str::FromStr;

use labrig_core::{Result, RigError};

/// Resource classes recognised as the trailing segment.
const RESOURCE_CLASSES: [&str; 5] = ["INSTR", "SOCKET", "RAW", "INTFC", "BACKPLANE"];

/// Bus type selected by the address prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterfaceKind {
    /// IEEE 488 bus.
    Gpib,
    /// LAN (VXI-11 / raw socket).
    Tcpip,
    /// USB test and measurement class.
    Usb,
    /// Serial port.
    Asrl,
}

impl InterfaceKind {
    /// Canonical prefix.
    pub fn prefix(self) -> &'static str {
        match self {
            InterfaceKind::Gpib => "GPIB",
            InterfaceKind::Tcpip => "TCPIP",
            InterfaceKind::Usb => "USB",
            InterfaceKind::Asrl => "ASRL",
        }
    }
}

impl std::fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.prefix())
    }
}

/// A parsed resource string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceAddress {
    raw: String,
    /// Bus type.
    pub kind: InterfaceKind,
    /// Board number, or a device path for `ASRL/dev/...` addresses.
    pub board: String,
    /// Identifying segments between the prefix and the resource class.
    pub segments: Vec<String>,
    /// Resource class (`INSTR`, `SOCKET`, ...), upper case.
    pub resource_class: String,
}

impl ResourceAddress {
    /// Parse `address`.
    ///
    /// # Errors
    /// `ChannelOpen` when the prefix is unknown or the shape is malformed.
    pub fn parse(address: &str) -> Result<Self> {
        let invalid = |reason: &str| RigError::channel_open(address, reason);

        let trimmed = address.trim();
        let mut parts: Vec<&str> = trimmed.split("::").collect();
        let head = parts.remove(0);

        let upper = head.to_ascii_uppercase();
        let kind = [
            InterfaceKind::Tcpip,
            InterfaceKind::Gpib,
            InterfaceKind::Asrl,
            InterfaceKind::Usb,
        ]
        .into_iter()
        .find(|kind| upper.starts_with(kind.prefix()))
        .ok_or_else(|| invalid("unrecognised interface prefix"))?;

        let board = &head[kind.prefix().len()..];
        let board = match kind {
            InterfaceKind::Asrl if board.is_empty() => {
                return Err(invalid("serial address needs a port number or path"))
            }
            InterfaceKind::Asrl => board.to_string(),
            _ if board.is_empty() => "0".to_string(),
            _ if board.chars().all(|c| c.is_ascii_digit()) => board.to_string(),
            _ => return Err(invalid("board number must be numeric")),
        };

        let resource_class = match parts.last() {
            Some(last) if RESOURCE_CLASSES.contains(&last.to_ascii_uppercase().as_str()) => {
                let class = last.to_ascii_uppercase();
                parts.pop();
                class
            }
            _ => "INSTR".to_string(),
        };

        if parts.iter().any(|segment| segment.trim().is_empty()) {
            return Err(invalid("empty address segment"));
        }
        if kind != InterfaceKind::Asrl && parts.is_empty() && resource_class != "INTFC" {
            return Err(invalid("missing device locator"));
        }

        Ok(Self {
            raw: trimmed.to_string(),
            kind,
            board,
            segments: parts.into_iter().map(str::to_string).collect(),
            resource_class,
        })
    }

    /// The address as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Name of the physical bus this address occupies.
    ///
    /// Devices on one GPIB board share the bus; LAN instruments are keyed by
    /// host; USB instruments are independent of each other.
    pub fn bus_key(&self) -> String {
        match self.kind {
            InterfaceKind::Gpib | InterfaceKind::Asrl => {
                format!("{}{}", self.kind.prefix(), self.board)
            }
            InterfaceKind::Tcpip => format!(
                "TCPIP{}::{}",
                self.board,
                self.segments
                    .first()
                    .map(|host| host.to_ascii_lowercase())
                    .unwrap_or_default()
            ),
            InterfaceKind::Usb => format!("USB{}::{}", self.board, self.segments.join("::")),
        }
    }
}

impl FromStr for ResourceAddress {
    type Err = RigError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}
