//! Driver and network configuration.
//!
//! Network options arrive from the runtime as an untyped JSON map. They are
//! parsed once, at network creation, into a [`NetworkConfiguration`] that is
//! immutable for the lifetime of the network.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use l2bridge_common::label;
use l2bridge_common::{DriverError, DriverResult, id};
use serde_json::Value;

use crate::ipam::IpamData;

/// Untyped option map as sent by the runtime.
pub type Options = serde_json::Map<String, Value>;

/// Prefix of bridge device names the driver picks itself.
pub const BRIDGE_NAME_PREFIX: &str = "br-";

/// Driver-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    /// Enable IPv4 forwarding on the host.
    pub enable_ip_forwarding: bool,
    /// Program packet filter rules.
    pub enable_iptables: bool,
    /// A userland proxy handles port forwarding, so hairpin mode is not
    /// needed on bridge ports.
    pub enable_userland_proxy: bool,
    /// Path of the userland proxy binary.
    pub userland_proxy_path: Option<PathBuf>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            enable_ip_forwarding: true,
            enable_iptables: true,
            enable_userland_proxy: false,
            userland_proxy_path: None,
        }
    }
}

/// Per-network configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkConfiguration {
    /// Network id.
    pub id: String,
    /// Name of the bridge device.
    pub bridge_name: String,
    /// Whether endpoints get IPv6 addresses.
    pub enable_ipv6: bool,
    /// MTU applied to both ends of every veth pair; zero keeps the default.
    pub mtu: i64,
    /// Prefix of the interface name inside the container.
    pub container_iface_prefix: Option<String>,
    /// IPv4 subnet.
    pub pool_ipv4: Option<Ipv4Net>,
    /// IPv6 subnet.
    pub pool_ipv6: Option<Ipv6Net>,
    /// Default IPv4 gateway handed to endpoints.
    pub default_gateway_ipv4: Option<Ipv4Addr>,
    /// Default IPv6 gateway handed to endpoints.
    pub default_gateway_ipv6: Option<Ipv6Addr>,
}

impl NetworkConfiguration {
    /// Static validation, done before any kernel state is touched.
    pub fn validate(&self) -> DriverResult<()> {
        if u32::try_from(self.mtu).is_err() {
            return Err(DriverError::invalid_mtu(self.mtu));
        }

        if let (Some(pool), Some(gateway)) = (self.pool_ipv4, self.default_gateway_ipv4) {
            if !pool.contains(&gateway) {
                return Err(DriverError::invalid_gateway());
            }
        }

        if self.enable_ipv6 {
            if let Some(gateway) = self.default_gateway_ipv6 {
                match self.pool_ipv6 {
                    Some(pool) if pool.contains(&gateway) => {}
                    _ => return Err(DriverError::invalid_gateway()),
                }
            }
        }

        Ok(())
    }

    /// Apply generic labels. Unknown keys are logged and ignored.
    pub fn apply_labels(&mut self, labels: &Options) -> DriverResult<()> {
        for (key, value) in labels {
            match key.as_str() {
                label::DOCKER_BRIDGE_NAME | label::BRIDGE_NAME => {
                    self.bridge_name = expect_str(key, value)?.to_string();
                }
                label::GATEWAY_IPV4 => {
                    let gateway = expect_str(key, value)?;
                    self.default_gateway_ipv4 = Some(gateway.parse().map_err(|_| {
                        DriverError::bad_request(format!(
                            "failed to parse {key}: {gateway} is not a valid IPv4 address"
                        ))
                    })?);
                }
                label::GATEWAY_IPV6 => {
                    let gateway = expect_str(key, value)?;
                    self.default_gateway_ipv6 = Some(gateway.parse().map_err(|_| {
                        DriverError::bad_request(format!(
                            "failed to parse {key}: {gateway} is not a valid IPv6 address"
                        ))
                    })?);
                }
                label::DRIVER_MTU => {
                    self.mtu = match value {
                        Value::Number(n) => n
                            .as_i64()
                            .ok_or_else(|| parse_err(key, value, "not an integer"))?,
                        Value::String(s) => s
                            .trim()
                            .parse()
                            .map_err(|e: std::num::ParseIntError| {
                                parse_err(key, value, &e.to_string())
                            })?,
                        other => return Err(unrecognized_type(key, other)),
                    };
                }
                label::ENABLE_IPV6 => self.enable_ipv6 = parse_bool_value(key, value)?,
                label::CONTAINER_IFACE_PREFIX => {
                    self.container_iface_prefix = Some(expect_str(key, value)?.to_string());
                }
                _ => {
                    tracing::warn!(key = %key, value = %value, "Ignoring unrecognized configuration option");
                }
            }
        }
        Ok(())
    }

    /// Fold the IPAM records of a network into the configuration.
    ///
    /// At most one record per address family is accepted and an IPv4 pool
    /// is mandatory. A `DefaultGatewayIPv4`/`DefaultGatewayIPv6` auxiliary
    /// address overrides a gateway given as a label.
    pub fn process_ipam(&mut self, id: &str, ipv4: &[IpamData], ipv6: &[IpamData]) -> DriverResult<()> {
        if ipv4.len() > 1 || ipv6.len() > 1 {
            return Err(DriverError::forbidden(
                "l2bridge driver doesn't support multiple subnets",
            ));
        }

        let (data, v4) = ipv4
            .first()
            .and_then(|data| data.pool.map(|pool| (data, pool)))
            .ok_or_else(|| {
                DriverError::bad_request(format!(
                    "l2bridge network {id} requires ipv4 configuration"
                ))
            })?;
        let IpNet::V4(pool) = v4 else {
            return Err(DriverError::bad_request(format!(
                "ipv4 pool of network {id} is not an IPv4 subnet: {v4}"
            )));
        };
        self.pool_ipv4 = Some(pool.trunc());
        if let Some(gateway) = data.aux_address(label::DEFAULT_GATEWAY_V4_AUX_KEY) {
            match gateway {
                IpNet::V4(gw) => self.default_gateway_ipv4 = Some(gw.addr()),
                IpNet::V6(_) => return Err(DriverError::invalid_gateway()),
            }
        }

        if let Some(data) = ipv6.first() {
            match data.pool {
                Some(IpNet::V6(pool)) => self.pool_ipv6 = Some(pool.trunc()),
                Some(IpNet::V4(pool)) => {
                    return Err(DriverError::bad_request(format!(
                        "ipv6 pool of network {id} is not an IPv6 subnet: {pool}"
                    )));
                }
                None => {}
            }
            if let Some(gateway) = data.aux_address(label::DEFAULT_GATEWAY_V6_AUX_KEY) {
                match gateway {
                    IpNet::V6(gw) => self.default_gateway_ipv6 = Some(gw.addr()),
                    IpNet::V4(_) => return Err(DriverError::invalid_gateway()),
                }
            }
        }

        Ok(())
    }

    /// Interface name prefix inside the container.
    #[must_use]
    pub fn container_prefix(&self) -> &str {
        self.container_iface_prefix
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_CONTAINER_IFACE_PREFIX)
    }
}

/// Interface name prefix used when the network does not set one.
pub const DEFAULT_CONTAINER_IFACE_PREFIX: &str = "eth";

/// Parse the network options of a `CreateNetwork` request.
///
/// Generic labels are applied first, then the well-known top-level keys.
/// The result is validated and its bridge name defaulted to
/// `br-<short id>`. Parsing has no side effects.
pub fn parse_network_options(id: &str, options: &Options) -> DriverResult<NetworkConfiguration> {
    let mut config = NetworkConfiguration::default();

    match options.get(label::GENERIC_DATA) {
        None | Some(Value::Null) => {}
        Some(Value::Object(labels)) => config.apply_labels(labels)?,
        Some(other) => {
            return Err(DriverError::bad_request(format!(
                "do not recognize network configuration format: {}",
                type_name(other)
            )));
        }
    }

    if let Some(value) = options.get(label::ENABLE_IPV6) {
        config.enable_ipv6 = parse_bool_value(label::ENABLE_IPV6, value)?;
    }

    config.validate()?;

    if config.bridge_name.is_empty() {
        config.bridge_name = format!("{BRIDGE_NAME_PREFIX}{}", id::short(id));
    }
    config.id = id.to_string();
    Ok(config)
}

fn expect_str<'v>(key: &str, value: &'v Value) -> DriverResult<&'v str> {
    value.as_str().ok_or_else(|| unrecognized_type(key, value))
}

fn parse_bool_value(key: &str, value: &Value) -> DriverResult<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => {
            parse_bool(s).ok_or_else(|| parse_err(key, value, "invalid syntax"))
        }
        other => Err(unrecognized_type(key, other)),
    }
}

/// Boolean spellings accepted in string-typed options.
fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

fn parse_err(key: &str, value: &Value, reason: &str) -> DriverError {
    DriverError::bad_request(format!("failed to parse {key} value: {value} ({reason})"))
}

fn unrecognized_type(key: &str, value: &Value) -> DriverError {
    DriverError::bad_request(format!("unrecognized type for {key}: {}", type_name(value)))
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
