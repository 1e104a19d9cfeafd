//! Option keys understood by the driver.
//!
//! The runtime passes network and endpoint options as string-keyed maps.
//! These constants name the keys the driver recognizes.

/// Map of driver specific labels nested inside the network options.
pub const GENERIC_DATA: &str = "com.docker.network.generic";

/// Enables IPv6 on a network.
pub const ENABLE_IPV6: &str = "com.docker.network.enable_ipv6";

/// MTU applied to every endpoint interface of a network.
pub const DRIVER_MTU: &str = "com.docker.network.driver.mtu";

/// Name prefix of the interface inside the container.
pub const CONTAINER_IFACE_PREFIX: &str = "com.docker.network.container_iface_prefix";

/// Bridge device name, as understood by the stock bridge driver.
pub const DOCKER_BRIDGE_NAME: &str = "com.docker.network.bridge.name";

/// Bridge device name.
pub const BRIDGE_NAME: &str = "l2bridge.name";

/// Default IPv4 gateway handed to containers.
pub const GATEWAY_IPV4: &str = "l2bridge.gateway";

/// Default IPv6 gateway handed to containers.
pub const GATEWAY_IPV6: &str = "l2bridge.ipv6.gateway";

/// Caller supplied MAC address of an endpoint.
pub const MAC_ADDRESS: &str = "com.docker.network.endpoint.macaddress";

/// Ports exposed by the container joining an endpoint.
pub const EXPOSED_PORTS: &str = "com.docker.network.endpoint.exposedports";

/// Gateway reported for an endpoint.
pub const GATEWAY: &str = "com.docker.network.gateway";

/// IPAM auxiliary address key carrying the IPv4 default gateway.
pub const DEFAULT_GATEWAY_V4_AUX_KEY: &str = "DefaultGatewayIPv4";

/// IPAM auxiliary address key carrying the IPv6 default gateway.
pub const DEFAULT_GATEWAY_V6_AUX_KEY: &str = "DefaultGatewayIPv6";
