//! IPAM data supplied with `CreateNetwork`.

use std::collections::HashMap;

use ipnet::IpNet;
use l2bridge_common::{DriverError, DriverResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// IPAM record as it appears on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawIpamData {
    /// Address space the pool was allocated from.
    #[serde(default)]
    pub address_space: String,
    /// Subnet in CIDR notation.
    #[serde(default)]
    pub pool: String,
    /// Gateway in CIDR notation.
    #[serde(default)]
    pub gateway: String,
    /// Auxiliary addresses keyed by purpose.
    #[serde(default)]
    pub aux_addresses: Option<serde_json::Map<String, Value>>,
}

/// Parsed IPv4 or IPv6 addressing information.
///
/// Gateway and auxiliary addresses keep their host part; only the pool is
/// a subnet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpamData {
    /// Address space the pool was allocated from.
    pub address_space: String,
    /// Subnet.
    pub pool: Option<IpNet>,
    /// Gateway address with its prefix length.
    pub gateway: Option<IpNet>,
    /// Auxiliary addresses keyed by purpose.
    pub aux_addresses: HashMap<String, IpNet>,
}

impl IpamData {
    /// Parse a wire record.
    pub fn parse(raw: &RawIpamData) -> DriverResult<Self> {
        let pool = parse_cidr(&raw.pool)
            .map_err(|e| DriverError::bad_request(format!("bad pool address: {e}")))?
            .map(|pool| pool.trunc());
        let gateway = parse_cidr(&raw.gateway)
            .map_err(|e| DriverError::bad_request(format!("bad gateway address: {e}")))?;

        let mut aux_addresses = HashMap::new();
        for (key, value) in raw.aux_addresses.iter().flatten() {
            let Value::String(addr) = value else {
                return Err(DriverError::bad_request(format!(
                    "invalid aux address {key}: {value} is not a string"
                )));
            };
            let addr = parse_cidr(addr)
                .map_err(|e| DriverError::bad_request(format!("bad aux address {key}: {e}")))?;
            if let Some(addr) = addr {
                aux_addresses.insert(key.clone(), addr);
            }
        }

        Ok(Self {
            address_space: raw.address_space.clone(),
            pool,
            gateway,
            aux_addresses,
        })
    }

    /// Auxiliary address registered under `key`.
    #[must_use]
    pub fn aux_address(&self, key: &str) -> Option<IpNet> {
        self.aux_addresses.get(key).copied()
    }
}

/// Parse every record of one address family.
pub fn parse_ipam_data(raw: &[RawIpamData], family: &str) -> DriverResult<Vec<IpamData>> {
    raw.iter()
        .map(|data| {
            IpamData::parse(data).map_err(|e| {
                DriverError::bad_request(format!("invalid {family} information: {e}"))
            })
        })
        .collect()
}

fn parse_cidr(s: &str) -> Result<Option<IpNet>, ipnet::AddrParseError> {
    if s.is_empty() {
        return Ok(None);
    }
    s.parse().map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use l2bridge_common::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_decode_wire_record() {
        let raw: RawIpamData = serde_json::from_value(json!({
            "AddressSpace": "LocalDefault",
            "Pool": "172.18.0.9/16",
            "Gateway": "172.18.0.1/16",
            "AuxAddresses": { "DefaultGatewayIPv4": "172.18.0.254/16" }
        }))
        .unwrap();

        let data = IpamData::parse(&raw).unwrap();
        assert_eq!(data.address_space, "LocalDefault");
        assert_eq!(data.pool, Some("172.18.0.0/16".parse().unwrap()));
        assert_eq!(data.gateway, Some("172.18.0.1/16".parse().unwrap()));
        assert_eq!(
            data.aux_address("DefaultGatewayIPv4"),
            Some("172.18.0.254/16".parse().unwrap())
        );
    }

    #[test]
    fn test_null_and_missing_fields() {
        let raw: RawIpamData =
            serde_json::from_value(json!({ "Pool": "10.0.0.0/8", "AuxAddresses": null })).unwrap();
        let data = IpamData::parse(&raw).unwrap();
        assert!(data.gateway.is_none());
        assert!(data.aux_addresses.is_empty());
    }

    #[test]
    fn test_bad_addresses_are_bad_requests() {
        let cases = [
            json!({ "Pool": "10.0.0.0" }),
            json!({ "Pool": "10.0.0.0/8", "Gateway": "nonsense" }),
            json!({ "Pool": "10.0.0.0/8", "AuxAddresses": { "x": "10.0.0.1" } }),
            json!({ "Pool": "10.0.0.0/8", "AuxAddresses": { "x": 12 } }),
        ];
        for case in cases {
            let raw: RawIpamData = serde_json::from_value(case).unwrap();
            let err = parse_ipam_data(&[raw], "IPv4").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::BadRequest);
            assert!(err.to_string().starts_with("invalid IPv4 information"));
        }
    }
}
