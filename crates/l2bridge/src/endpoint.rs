//! Endpoints: the veth pairs connecting sandboxes to a bridge.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::{Ipv4Net, Ipv6Net};
use l2bridge_common::{DriverError, DriverResult, label};
use l2bridge_network::{KernelLinks, Link, MacAddress, TransportPort, veth};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{Configuration, NetworkConfiguration, Options};
use crate::rollback::Rollback;

/// User supplied endpoint settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointConfiguration {
    /// MAC address requested through the endpoint options.
    pub mac_address: Option<MacAddress>,
}

/// Parse `CreateEndpoint` options. Only the MAC address key is understood.
pub fn parse_endpoint_options(options: Option<&Options>) -> DriverResult<EndpointConfiguration> {
    let mut config = EndpointConfiguration::default();
    let Some(options) = options else {
        return Ok(config);
    };

    if let Some(value) = options.get(label::MAC_ADDRESS) {
        let mac = match value {
            Value::String(s) => s
                .parse()
                .map_err(|_| DriverError::invalid_endpoint_config())?,
            _ => return Err(DriverError::invalid_endpoint_config()),
        };
        config.mac_address = Some(mac);
    }
    Ok(config)
}

/// Interface addressing exchanged with the runtime on `CreateEndpoint`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointInterface {
    /// Hardware address.
    pub mac_address: Option<MacAddress>,
    /// IPv4 address with prefix length.
    pub address: Option<Ipv4Net>,
    /// IPv6 address with prefix length.
    pub address_ipv6: Option<Ipv6Net>,
}

/// [`EndpointInterface`] as it appears on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawEndpointInterface {
    /// IPv4 address in CIDR notation.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,
    /// IPv6 address in CIDR notation.
    #[serde(default, rename = "AddressIPv6", skip_serializing_if = "String::is_empty")]
    pub address_ipv6: String,
    /// Hardware address, colon separated.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mac_address: String,
}

impl EndpointInterface {
    /// Parse a wire interface.
    pub fn parse(raw: &RawEndpointInterface) -> DriverResult<Self> {
        let mut out = Self::default();
        if !raw.mac_address.is_empty() {
            out.mac_address = Some(raw.mac_address.parse().map_err(|e| {
                DriverError::bad_request(format!("invalid endpoint info: bad MAC address: {e}"))
            })?);
        }
        if !raw.address.is_empty() {
            out.address = Some(raw.address.parse().map_err(|e| {
                DriverError::bad_request(format!("invalid endpoint info: bad IPv4 address: {e}"))
            })?);
        }
        if !raw.address_ipv6.is_empty() {
            out.address_ipv6 = Some(raw.address_ipv6.parse().map_err(|e| {
                DriverError::bad_request(format!("invalid endpoint info: bad ipv6 address: {e}"))
            })?);
        }
        Ok(out)
    }

    /// Encode for the wire. Unset fields are left empty.
    #[must_use]
    pub fn to_raw(&self) -> RawEndpointInterface {
        RawEndpointInterface {
            mac_address: self
                .mac_address
                .map(|m| m.to_string())
                .unwrap_or_default(),
            address: self.address.map(|a| a.to_string()).unwrap_or_default(),
            address_ipv6: self
                .address_ipv6
                .map(|a| a.to_string())
                .unwrap_or_default(),
        }
    }
}

/// Driver record of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeEndpoint {
    /// Endpoint id.
    pub id: String,
    /// Owning network id.
    pub network_id: String,
    /// Sandbox side of the veth pair.
    pub src_name: String,
    /// Host side of the veth pair, attached to the bridge.
    pub host_name: String,
    /// IPv4 address.
    pub addr_v4: Option<Ipv4Net>,
    /// IPv6 address.
    pub addr_v6: Option<Ipv6Net>,
    /// IPv4 gateway.
    pub gateway_v4: Option<Ipv4Addr>,
    /// IPv6 gateway.
    pub gateway_v6: Option<Ipv6Addr>,
    /// Hardware address of the sandbox interface.
    pub mac_address: Option<MacAddress>,
    /// User supplied settings.
    pub config: EndpointConfiguration,
    /// Ports exposed by the container, set on join.
    pub exposed_ports: Option<Vec<TransportPort>>,
}

impl BridgeEndpoint {
    /// Record reserving `id` while the endpoint is provisioned.
    #[must_use]
    pub fn placeholder(id: &str, network_id: &str, config: EndpointConfiguration) -> Self {
        Self {
            id: id.to_string(),
            network_id: network_id.to_string(),
            src_name: String::new(),
            host_name: String::new(),
            addr_v4: None,
            addr_v6: None,
            gateway_v4: None,
            gateway_v6: None,
            mac_address: None,
            config,
            exposed_ports: None,
        }
    }

    /// Record the network's default gateways, except those equal to the
    /// endpoint's own address.
    pub fn set_gateways(&mut self, network: &NetworkConfiguration) {
        self.gateway_v4 = network
            .default_gateway_ipv4
            .filter(|gw| self.addr_v4.is_none_or(|addr| addr.addr() != *gw));
        self.gateway_v6 = network
            .default_gateway_ipv6
            .filter(|gw| self.addr_v6.is_none_or(|addr| addr.addr() != *gw));
    }

    /// Operational data reported by `EndpointInfo`.
    #[must_use]
    pub fn info(&self) -> BTreeMap<String, String> {
        let mut info = BTreeMap::new();
        if let Some(ports) = &self.exposed_ports {
            let ports: Vec<String> = ports.iter().map(ToString::to_string).collect();
            info.insert(label::EXPOSED_PORTS.to_string(), ports.join(","));
        }
        if let Some(mac) = self.mac_address {
            info.insert(label::MAC_ADDRESS.to_string(), mac.to_string());
        }
        let gateway = self
            .gateway_v4
            .map(IpAddr::V4)
            .or_else(|| self.gateway_v6.map(IpAddr::V6));
        if let Some(gateway) = gateway {
            info.insert(label::GATEWAY.to_string(), gateway.to_string());
        }
        info
    }
}

/// Interface naming in and out of the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceName {
    /// Name of the interface to move into the sandbox.
    pub src_name: String,
    /// Prefix the runtime uses to rename it.
    pub dst_prefix: String,
}

/// Result of joining a sandbox to an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinInfo {
    /// Interface naming.
    pub interface_name: InterfaceName,
    /// IPv4 gateway.
    pub gateway: Option<Ipv4Addr>,
    /// IPv6 gateway.
    pub gateway_ipv6: Option<Ipv6Addr>,
    /// Stop the runtime from providing its own default gateway.
    pub disable_gateway_service: bool,
}

/// Both ends of a provisioned veth pair.
#[derive(Debug, Clone)]
pub struct VethPair {
    /// Host side, attached to the bridge.
    pub host: Link,
    /// Sandbox side.
    pub sandbox: Link,
}

/// Creates the veth pair of a new endpoint and wires it to the bridge.
pub struct EndpointProvisioner<'a> {
    links: &'a dyn KernelLinks,
    network: &'a NetworkConfiguration,
    driver: &'a Configuration,
}

impl<'a> EndpointProvisioner<'a> {
    /// Provisioner for an endpoint of `network`.
    pub fn new(
        links: &'a dyn KernelLinks,
        network: &'a NetworkConfiguration,
        driver: &'a Configuration,
    ) -> Self {
        Self {
            links,
            network,
            driver,
        }
    }

    /// Create the pair, apply the MTU, attach the host side to the bridge,
    /// set hairpin mode and bring the host side up.
    ///
    /// Every link created is registered on `rollback`.
    pub async fn provision(&self, rollback: &mut Rollback<'a>) -> DriverResult<VethPair> {
        let links = self.links;
        let (host_name, sandbox_name) = veth::generate_pair_names(links).await?;

        links.add_veth(&host_name, &sandbox_name).await?;

        let host = links.link_by_name(&host_name).await?.ok_or_else(|| {
            DriverError::internal(format!("failed to find host side interface {host_name}"))
        })?;
        let undo_host = host.clone();
        rollback.push(format!("delete host interface {host_name}"), async move {
            links.delete_link(&undo_host).await
        });

        let sandbox = links.link_by_name(&sandbox_name).await?.ok_or_else(|| {
            DriverError::internal(format!(
                "failed to find sandbox side interface {sandbox_name}"
            ))
        })?;
        let undo_sandbox = sandbox.clone();
        rollback.push(
            format!("delete sandbox interface {sandbox_name}"),
            async move { links.delete_link(&undo_sandbox).await },
        );

        if self.network.mtu != 0 {
            let mtu = u32::try_from(self.network.mtu)
                .map_err(|_| DriverError::invalid_mtu(self.network.mtu))?;
            links.set_mtu(&host, mtu).await.map_err(|e| {
                DriverError::internal(format!(
                    "failed to set MTU on host interface {host_name}: {e}"
                ))
            })?;
            links.set_mtu(&sandbox, mtu).await.map_err(|e| {
                DriverError::internal(format!(
                    "failed to set MTU on sandbox interface {sandbox_name}: {e}"
                ))
            })?;
        }

        let bridge_name = &self.network.bridge_name;
        let bridge = links.link_by_name(bridge_name).await?.ok_or_else(|| {
            DriverError::internal(format!("could not find bridge {bridge_name}"))
        })?;
        links.set_master(&host, &bridge).await.map_err(|e| {
            DriverError::internal(format!(
                "adding interface {host_name} to bridge {bridge_name} failed: {e}"
            ))
        })?;

        if !self.driver.enable_userland_proxy {
            links.set_hairpin(&host, true).await?;
        }

        links.set_up(&host).await.map_err(|e| {
            DriverError::internal(format!(
                "could not set link up for host interface {host_name}: {e}"
            ))
        })?;

        tracing::debug!(
            host = %host_name,
            sandbox = %sandbox_name,
            bridge = %bridge_name,
            "Veth pair attached to bridge"
        );
        Ok(VethPair { host, sandbox })
    }
}

impl std::fmt::Debug for EndpointProvisioner<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointProvisioner")
            .field("bridge", &self.network.bridge_name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use l2bridge_common::ErrorKind;
    use l2bridge_network::LinkKind;
    use l2bridge_network::fake::{FailPoint, FakeLinks};
    use serde_json::json;

    fn options(value: Value) -> Options {
        value.as_object().cloned().unwrap()
    }

    fn network(mtu: i64) -> NetworkConfiguration {
        NetworkConfiguration {
            id: "n1".into(),
            bridge_name: "br-n1".into(),
            mtu,
            ..NetworkConfiguration::default()
        }
    }

    #[test]
    fn test_endpoint_options() {
        assert_eq!(parse_endpoint_options(None).unwrap(), EndpointConfiguration::default());

        let opts = options(json!({ "com.docker.network.endpoint.macaddress": "02:42:0a:00:00:09" }));
        let config = parse_endpoint_options(Some(&opts)).unwrap();
        assert_eq!(config.mac_address.unwrap().to_string(), "02:42:0a:00:00:09");

        let opts = options(json!({ "com.docker.network.endpoint.macaddress": 12 }));
        let err = parse_endpoint_options(Some(&opts)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn test_interface_wire_format() {
        let raw: RawEndpointInterface = serde_json::from_value(json!({
            "Address": "10.0.0.2/24",
            "AddressIPv6": "",
            "MacAddress": ""
        }))
        .unwrap();
        let iface = EndpointInterface::parse(&raw).unwrap();
        assert_eq!(iface.address, Some("10.0.0.2/24".parse().unwrap()));
        assert!(iface.mac_address.is_none());

        let out = EndpointInterface {
            mac_address: Some("02:42:0a:00:00:02".parse().unwrap()),
            ..EndpointInterface::default()
        };
        assert_eq!(
            serde_json::to_value(out.to_raw()).unwrap(),
            json!({ "MacAddress": "02:42:0a:00:00:02" })
        );

        let bad = RawEndpointInterface {
            address: "10.0.0.2".into(),
            ..RawEndpointInterface::default()
        };
        assert_eq!(
            EndpointInterface::parse(&bad).unwrap_err().kind(),
            ErrorKind::BadRequest
        );
    }

    #[test]
    fn test_gateway_equal_to_own_address_is_skipped() {
        let mut config = network(0);
        config.default_gateway_ipv4 = Some("10.0.0.1".parse().unwrap());

        let mut ep = BridgeEndpoint::placeholder("e", "n1", EndpointConfiguration::default());
        ep.addr_v4 = Some("10.0.0.1/24".parse().unwrap());
        ep.set_gateways(&config);
        assert!(ep.gateway_v4.is_none());

        ep.addr_v4 = Some("10.0.0.2/24".parse().unwrap());
        ep.set_gateways(&config);
        assert_eq!(ep.gateway_v4, config.default_gateway_ipv4);
    }

    #[test]
    fn test_info_keys() {
        let mut ep = BridgeEndpoint::placeholder("e", "n1", EndpointConfiguration::default());
        assert!(ep.info().is_empty());

        ep.mac_address = Some("02:42:0a:00:00:02".parse().unwrap());
        ep.gateway_v6 = Some("fd00::1".parse().unwrap());
        ep.exposed_ports = Some(vec![TransportPort::tcp(80), TransportPort::udp(53)]);
        let info = ep.info();
        assert_eq!(info["com.docker.network.endpoint.exposedports"], "tcp/80,udp/53");
        assert_eq!(info["com.docker.network.endpoint.macaddress"], "02:42:0a:00:00:02");
        assert_eq!(info["com.docker.network.gateway"], "fd00::1");
    }

    #[tokio::test]
    async fn test_provision_wires_pair_to_bridge() {
        let links = FakeLinks::new();
        let bridge = links.insert_link("br-n1", LinkKind::Bridge);
        let config = network(1400);
        let driver = Configuration::default();

        let mut rollback = Rollback::new("test");
        let pair = EndpointProvisioner::new(&links, &config, &driver)
            .provision(&mut rollback)
            .await
            .unwrap();
        rollback.commit();

        let host = links.link(&pair.host.name).unwrap();
        let sandbox = links.link(&pair.sandbox.name).unwrap();
        assert_eq!(host.master, Some(bridge.index));
        assert!(host.hairpin);
        assert!(host.link.up);
        assert_eq!(host.mtu, 1400);
        assert_eq!(sandbox.mtu, 1400);
        assert!(sandbox.master.is_none());
    }

    #[tokio::test]
    async fn test_userland_proxy_skips_hairpin() {
        let links = FakeLinks::new();
        links.insert_link("br-n1", LinkKind::Bridge);
        links.fail_on(FailPoint::SetHairpin);
        let config = network(0);
        let driver = Configuration {
            enable_userland_proxy: true,
            ..Configuration::default()
        };

        let mut rollback = Rollback::new("test");
        let pair = EndpointProvisioner::new(&links, &config, &driver)
            .provision(&mut rollback)
            .await
            .unwrap();
        rollback.commit();
        assert!(!links.link(&pair.host.name).unwrap().hairpin);
        assert_eq!(links.link(&pair.host.name).unwrap().mtu, 1500);
    }

    #[tokio::test]
    async fn test_failed_provision_unwinds_links() {
        let links = FakeLinks::new();
        links.insert_link("br-n1", LinkKind::Bridge);
        links.fail_on(FailPoint::SetMaster);
        let config = network(0);
        let driver = Configuration::default();

        let mut rollback = Rollback::new("test");
        let result = EndpointProvisioner::new(&links, &config, &driver)
            .provision(&mut rollback)
            .await;
        assert!(result.is_err());
        assert_eq!(rollback.len(), 2);
        rollback.unwind().await;
        assert_eq!(links.link_names(), vec!["br-n1"]);
    }
}
