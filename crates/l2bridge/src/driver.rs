//! The bridge driver.
//!
//! [`BridgeDriver`] owns the network registry and orchestrates network and
//! endpoint lifecycles. Network creation and deletion are serialized
//! against each other by the network configuration lock; endpoint
//! operations only take the per-network lock.

use std::collections::BTreeMap;
use std::sync::Arc;

use ipnet::{IpNet, Ipv4Net};
use l2bridge_common::{DriverError, DriverResult, label};
use l2bridge_network::{
    Iptables, KernelLinks, NetlinkHandle, PacketFilter, SysctlTree, parse_transport_ports,
};
use parking_lot::RwLock;

use crate::address;
use crate::bridge::{BridgeInterface, bridge_interface_exists};
use crate::config::{Configuration, Options, parse_network_options};
use crate::endpoint::{
    BridgeEndpoint, EndpointInterface, EndpointProvisioner, InterfaceName, JoinInfo,
    parse_endpoint_options,
};
use crate::firewall::{SetupForwardingRule, SetupReloadHook};
use crate::ipam::IpamData;
use crate::registry::{BridgeNetwork, NetworkRegistry};
use crate::rollback::Rollback;
use crate::setup::{BridgeSetup, SetupDevice, SetupDeviceUp, SetupDisableIpv6};

/// Layer-2 bridge network driver.
pub struct BridgeDriver {
    config: RwLock<Configuration>,
    registry: NetworkRegistry,
    links: Arc<dyn KernelLinks>,
    filter: Arc<dyn PacketFilter>,
    sysctl: SysctlTree,
    config_network: tokio::sync::Mutex<()>,
}

impl BridgeDriver {
    /// Create a driver over the given kernel capabilities.
    pub fn new(
        config: Configuration,
        links: Arc<dyn KernelLinks>,
        filter: Arc<dyn PacketFilter>,
        sysctl: SysctlTree,
    ) -> Self {
        Self {
            config: RwLock::new(config),
            registry: NetworkRegistry::new(),
            links,
            filter,
            sysctl,
            config_network: tokio::sync::Mutex::new(()),
        }
    }

    /// Create a driver for the host: netlink links, the `iptables` binary
    /// and `/proc/sys`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn host(config: Configuration) -> DriverResult<Self> {
        let links = Arc::new(NetlinkHandle::new()?);
        let filter = Arc::new(Iptables::new());
        Ok(Self::new(config, links, filter, SysctlTree::host()))
    }

    /// Current driver-wide configuration.
    #[must_use]
    pub fn config(&self) -> Configuration {
        self.config.read().clone()
    }

    /// Replace the driver-wide configuration and prepare the host for it.
    pub async fn configure(&self, config: Configuration) -> DriverResult<()> {
        if config.enable_iptables && !self.sysctl.exists("net/bridge") {
            load_bridge_modules().await;
        }

        if config.enable_ip_forwarding {
            self.sysctl.enable_ip_forwarding().inspect_err(|e| {
                tracing::warn!(error = %e, "Failed to setup IP forwarding");
            })?;
        }

        *self.config.write() = config;
        Ok(())
    }

    /// Ids of every registered network.
    #[must_use]
    pub fn networks(&self) -> Vec<String> {
        self.registry.ids()
    }

    /// Create a network and its bridge device.
    pub async fn create_network(
        &self,
        id: &str,
        options: &Options,
        ipv4: &[IpamData],
        ipv6: &[IpamData],
    ) -> DriverResult<()> {
        let unusable = ipv4
            .first()
            .and_then(|data| data.pool)
            .is_some_and(|pool| pool == IpNet::V4(Ipv4Net::default()));
        if ipv4.is_empty() || unusable {
            return Err(DriverError::bad_request("ipv4 pool is empty"));
        }
        if id.is_empty() {
            return Err(DriverError::bad_request("invalid network id: "));
        }
        if self.registry.contains(id) {
            return Err(DriverError::forbidden(format!("network {id} exists")));
        }

        let mut config = parse_network_options(id, options)?;

        let _ctx = self.links.enter_host_namespace()?;
        if bridge_interface_exists(self.links.as_ref(), &config.bridge_name).await? {
            return Err(DriverError::forbidden(format!(
                "interface with name {} exists",
                config.bridge_name
            )));
        }

        config.process_ipam(id, ipv4, ipv6)?;
        config.validate()?;

        let _guard = self.config_network.lock().await;
        let driver_config = self.config();

        let bridge = BridgeInterface::lookup(self.links.as_ref(), &config.bridge_name).await?;
        let network = Arc::new(BridgeNetwork::new(config, bridge.clone()));
        if !self.registry.insert_if_absent(Arc::clone(&network)) {
            return Err(DriverError::forbidden(format!("network {id} exists")));
        }

        let config = network.config();
        let mut setup = BridgeSetup::new(&config, bridge.clone());
        if !bridge.exists() {
            setup.queue_step(SetupDevice::new(self.links.as_ref()));
        }
        setup.queue_step(SetupDisableIpv6::new(&self.sysctl));
        if driver_config.enable_iptables {
            setup.queue_step(SetupForwardingRule::new(
                Arc::clone(&network),
                Arc::clone(&self.filter),
            ));
            setup.queue_step(SetupReloadHook::new(
                Arc::clone(&network),
                Arc::clone(&self.filter),
            ));
        }
        setup.queue_step(SetupDeviceUp::new(self.links.as_ref()));

        match setup.apply().await {
            Ok(bridge) => {
                network.set_bridge(bridge);
                tracing::info!(
                    network = %id,
                    bridge = %config.bridge_name,
                    "Network created"
                );
                Ok(())
            }
            Err(e) => {
                self.registry.remove_if_same(&network);
                Err(e)
            }
        }
    }

    /// Delete a network, its bridge device and its forwarding rule.
    ///
    /// Once the network is unregistered every teardown failure is logged and
    /// the call still succeeds.
    pub async fn delete_network(&self, id: &str) -> DriverResult<()> {
        let _guard = self.config_network.lock().await;
        let _ctx = self.links.enter_host_namespace()?;

        let network = self
            .registry
            .get(id)
            .ok_or_else(|| DriverError::maskable(format!("network {id} does not exist")))?;

        self.registry.remove(id);
        let links = self.links.as_ref();
        for endpoint in network.endpoints() {
            delete_host_link(links, &endpoint).await;
        }

        let bridge = network.bridge();
        let link = match bridge.link() {
            Some(link) => Some(link.clone()),
            None => match links.link_by_name(bridge.name()).await {
                Ok(link) => link,
                Err(e) => {
                    tracing::warn!(
                        network = %id,
                        bridge = %bridge.name(),
                        error = %e,
                        "Failed to look up bridge interface on network delete"
                    );
                    None
                }
            },
        };
        if let Some(link) = link {
            if let Err(e) = links.delete_link(&link).await {
                tracing::warn!(
                    network = %id,
                    bridge = %bridge.name(),
                    error = %e,
                    "Failed to remove bridge interface on network delete"
                );
            }
        }

        for cleanup in network.take_cleanups() {
            if let Err(e) = cleanup() {
                tracing::warn!(
                    network = %id,
                    error = %e,
                    "Failed to clean iptables rules for bridge network"
                );
            }
        }

        tracing::info!(network = %id, "Network deleted");
        Ok(())
    }

    /// Create an endpoint: a veth pair whose host side is attached to the
    /// network's bridge.
    ///
    /// The returned interface only carries the fields generated here.
    pub async fn create_endpoint(
        &self,
        nid: &str,
        eid: &str,
        iface: EndpointInterface,
        options: Option<&Options>,
    ) -> DriverResult<EndpointInterface> {
        let _ctx = self.links.enter_host_namespace()?;

        let network = self.network(nid)?;
        if network.endpoint(eid)?.is_some() {
            return Err(DriverError::endpoint_exists(eid));
        }
        let ep_config = parse_endpoint_options(options)?;

        let config = network.config();
        let driver_config = self.config();

        network.insert_endpoint(BridgeEndpoint::placeholder(eid, nid, ep_config.clone()))?;

        let mut rollback = Rollback::new("create endpoint");
        let placeholder_of = Arc::clone(&network);
        let placeholder_id = eid.to_string();
        rollback.push(format!("remove endpoint {eid}"), async move {
            placeholder_of.remove_endpoint(&placeholder_id);
            Ok(())
        });

        let result: DriverResult<EndpointInterface> = async {
            let pair = EndpointProvisioner::new(self.links.as_ref(), &config, &driver_config)
                .provision(&mut rollback)
                .await?;

            let mut endpoint = BridgeEndpoint::placeholder(eid, nid, ep_config.clone());
            endpoint.src_name = pair.sandbox.name;
            endpoint.host_name = pair.host.name;
            endpoint.addr_v4 = iface.address;
            endpoint.addr_v6 = iface.address_ipv6;
            endpoint.set_gateways(&config);

            let mut out = EndpointInterface::default();
            let requested = iface.mac_address.or(ep_config.mac_address);
            let (mac, generated) = address::endpoint_mac(requested, endpoint.addr_v4);
            endpoint.mac_address = Some(mac);
            if generated {
                out.mac_address = Some(mac);
            }

            if endpoint.addr_v6.is_none() && config.enable_ipv6 {
                let pool = config.pool_ipv6.ok_or_else(|| {
                    DriverError::forbidden(format!(
                        "Cannot self generate an IPv6 address on network {nid}: no IPv6 pool"
                    ))
                })?;
                let addr = address::derive_ipv6(pool, mac)?;
                endpoint.addr_v6 = Some(addr);
                out.address_ipv6 = Some(addr);
            }

            network.update_endpoint(endpoint)?;
            Ok(out)
        }
        .await;

        match result {
            Ok(out) => {
                rollback.commit();
                tracing::info!(network = %nid, endpoint = %eid, "Endpoint created");
                Ok(out)
            }
            Err(e) => {
                rollback.unwind().await;
                Err(e)
            }
        }
    }

    /// Delete an endpoint and its veth pair. Link failures are only logged.
    pub async fn delete_endpoint(&self, nid: &str, eid: &str) -> DriverResult<()> {
        let _ctx = self.links.enter_host_namespace()?;

        let network = self.network(nid)?;
        if eid.is_empty() {
            return Err(DriverError::invalid_endpoint_id(eid));
        }
        let endpoint = network
            .remove_endpoint(eid)
            .ok_or_else(|| DriverError::endpoint_not_found(eid))?;

        delete_host_link(self.links.as_ref(), &endpoint).await;
        tracing::info!(network = %nid, endpoint = %eid, "Endpoint deleted");
        Ok(())
    }

    /// Operational data of an endpoint.
    pub fn endpoint_info(&self, nid: &str, eid: &str) -> DriverResult<BTreeMap<String, String>> {
        let network = self.network(nid)?;
        Ok(network.require_endpoint(eid)?.info())
    }

    /// Attach a sandbox to an endpoint.
    pub fn join(
        &self,
        nid: &str,
        eid: &str,
        sandbox_key: &str,
        options: Option<&Options>,
    ) -> DriverResult<JoinInfo> {
        let network = self.network(nid)?;
        let endpoint = network.require_endpoint(eid)?;
        let config = network.config();

        if let Some(value) = options.and_then(|o| o.get(label::EXPOSED_PORTS)) {
            match parse_transport_ports(value) {
                Ok(ports) => {
                    network.set_exposed_ports(eid, ports);
                }
                Err(e) => tracing::warn!(
                    endpoint = %eid,
                    error = %e,
                    "Parsing of {} failed",
                    label::EXPOSED_PORTS
                ),
            }
        }

        tracing::debug!(network = %nid, endpoint = %eid, sandbox = %sandbox_key, "Endpoint joined");
        Ok(JoinInfo {
            interface_name: InterfaceName {
                src_name: endpoint.src_name,
                dst_prefix: config.container_prefix().to_string(),
            },
            gateway: endpoint.gateway_v4,
            gateway_ipv6: endpoint.gateway_v6,
            disable_gateway_service: endpoint.gateway_v4.is_none()
                && endpoint.gateway_v6.is_none(),
        })
    }

    /// Detach a sandbox from an endpoint. Only checks that both exist.
    pub fn leave(&self, nid: &str, eid: &str) -> DriverResult<()> {
        let network = self
            .network(nid)
            .map_err(|e| DriverError::maskable(e.to_string()))?;
        network.require_endpoint(eid)?;
        Ok(())
    }

    /// Re-run every packet filter reload hook.
    pub fn filter_reloaded(&self) {
        self.filter.reloaded();
    }

    fn network(&self, id: &str) -> DriverResult<Arc<BridgeNetwork>> {
        if id.is_empty() {
            return Err(DriverError::bad_request(format!("invalid network id: {id}")));
        }
        let network = self
            .registry
            .get(id)
            .ok_or_else(|| DriverError::not_found(format!("network {id} does not exist")))?;
        if network.id() != id {
            return Err(DriverError::invalid_network_id(id));
        }
        Ok(network)
    }
}

impl std::fmt::Debug for BridgeDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeDriver")
            .field("config", &*self.config.read())
            .field("networks", &self.registry.ids())
            .field("sysctl", &self.sysctl)
            .finish_non_exhaustive()
    }
}

async fn delete_host_link(links: &dyn KernelLinks, endpoint: &BridgeEndpoint) {
    if endpoint.host_name.is_empty() {
        return;
    }
    match links.link_by_name(&endpoint.host_name).await {
        Ok(Some(link)) => {
            if let Err(e) = links.delete_link(&link).await {
                tracing::error!(
                    endpoint = %endpoint.id,
                    interface = %endpoint.host_name,
                    error = %e,
                    "Failed to delete interface link"
                );
            }
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(
            endpoint = %endpoint.id,
            interface = %endpoint.host_name,
            error = %e,
            "Failed to look up endpoint interface"
        ),
    }
}

async fn load_bridge_modules() {
    let output = tokio::process::Command::new("modprobe")
        .args(["-va", "bridge", "br_netfilter"])
        .output()
        .await;
    match output {
        Ok(out) if out.status.success() => {
            tracing::debug!("Loaded bridge and br_netfilter modules");
        }
        Ok(out) => tracing::warn!(
            output = %String::from_utf8_lossy(&out.stderr).trim(),
            "Running modprobe bridge br_netfilter failed"
        ),
        Err(e) => tracing::warn!(error = %e, "Running modprobe bridge br_netfilter failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use l2bridge_common::ErrorKind;
    use l2bridge_network::fake::{FakeLinks, RecordingFilter};

    fn driver() -> BridgeDriver {
        BridgeDriver::new(
            Configuration::default(),
            Arc::new(FakeLinks::new()),
            Arc::new(RecordingFilter::new()),
            SysctlTree::with_root("/nonexistent"),
        )
    }

    #[test]
    fn test_lookups_on_unknown_network() {
        let driver = driver();
        assert_eq!(driver.network("").unwrap_err().kind(), ErrorKind::BadRequest);
        assert_eq!(driver.network("n1").unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(driver.leave("n1", "e1").unwrap_err().kind(), ErrorKind::Maskable);
        assert_eq!(
            driver.endpoint_info("n1", "e1").unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert!(driver.networks().is_empty());
    }

    #[tokio::test]
    async fn test_empty_ipv4_pool_is_rejected() {
        let driver = driver();
        let err = driver
            .create_network("n1", &Options::new(), &[], &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert_eq!(err.to_string(), "ipv4 pool is empty");
    }

    #[tokio::test]
    async fn test_delete_unknown_network_is_maskable() {
        let driver = driver();
        let err = driver.delete_network("n1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Maskable);
    }
}
