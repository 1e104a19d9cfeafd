//! Exposed transport ports of a container.

use std::fmt;

use l2bridge_common::{DriverError, DriverResult};
use serde_json::Value;

/// IP protocol of an exposed port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// ICMP protocol.
    Icmp,
    /// TCP protocol.
    Tcp,
    /// UDP protocol.
    Udp,
    /// SCTP protocol.
    Sctp,
    /// Any other IP protocol number.
    Other(u8),
}

impl Protocol {
    /// IANA protocol number.
    #[must_use]
    pub const fn number(self) -> u8 {
        match self {
            Self::Icmp => 1,
            Self::Tcp => 6,
            Self::Udp => 17,
            Self::Sctp => 132,
            Self::Other(n) => n,
        }
    }
}

impl From<u8> for Protocol {
    fn from(n: u8) -> Self {
        match n {
            1 => Self::Icmp,
            6 => Self::Tcp,
            17 => Self::Udp,
            132 => Self::Sctp,
            n => Self::Other(n),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Icmp => f.write_str("icmp"),
            Self::Tcp => f.write_str("tcp"),
            Self::Udp => f.write_str("udp"),
            Self::Sctp => f.write_str("sctp"),
            Self::Other(n) => write!(f, "{n}"),
        }
    }
}

/// A port exposed by a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportPort {
    /// IP protocol.
    pub proto: Protocol,
    /// Port number.
    pub port: u16,
}

impl TransportPort {
    /// Create a TCP port.
    #[must_use]
    pub const fn tcp(port: u16) -> Self {
        Self {
            proto: Protocol::Tcp,
            port,
        }
    }

    /// Create a UDP port.
    #[must_use]
    pub const fn udp(port: u16) -> Self {
        Self {
            proto: Protocol::Udp,
            port,
        }
    }
}

impl fmt::Display for TransportPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.proto, self.port)
    }
}

/// Decode the runtime's exposed ports option: an array of
/// `{"Proto": <number>, "Port": <number>}` objects.
pub fn parse_transport_ports(value: &Value) -> DriverResult<Vec<TransportPort>> {
    let entries = value
        .as_array()
        .ok_or_else(DriverError::invalid_transport_ports)?;

    entries
        .iter()
        .map(|entry| {
            let dict = entry
                .as_object()
                .ok_or_else(DriverError::invalid_transport_ports)?;
            let proto = dict
                .get("Proto")
                .and_then(Value::as_u64)
                .and_then(|n| u8::try_from(n).ok())
                .ok_or_else(DriverError::invalid_transport_ports)?;
            let port = dict
                .get("Port")
                .and_then(Value::as_u64)
                .and_then(|n| u16::try_from(n).ok())
                .ok_or_else(DriverError::invalid_transport_ports)?;
            Ok(TransportPort {
                proto: Protocol::from(proto),
                port,
            })
        })
        .collect()
}
