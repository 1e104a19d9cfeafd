//! Kernel link capability.
//!
//! The driver core never talks to the kernel directly. It calls through
//! [`KernelLinks`], which the netlink handle implements for real hosts and
//! an in-memory table implements for tests.

use std::fmt;

use async_trait::async_trait;
use ipnet::IpNet;
use l2bridge_common::DriverResult;

use crate::mac::MacAddress;
use crate::netns::NamespaceGuard;

/// Kind of a kernel network link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkKind {
    /// Layer-2 bridge device.
    Bridge,
    /// One end of a virtual ethernet pair.
    Veth,
    /// Any other link type.
    Other(String),
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bridge => f.write_str("bridge"),
            Self::Veth => f.write_str("veth"),
            Self::Other(kind) => f.write_str(kind),
        }
    }
}

/// A kernel link as seen by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// Interface index.
    pub index: u32,
    /// Interface name.
    pub name: String,
    /// Link type.
    pub kind: LinkKind,
    /// Whether the link is administratively up.
    pub up: bool,
}

impl Link {
    /// Whether this link is a bridge device.
    #[must_use]
    pub fn is_bridge(&self) -> bool {
        self.kind == LinkKind::Bridge
    }
}

/// Address family filter for [`KernelLinks::addresses`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    /// IPv4 addresses.
    V4,
    /// IPv6 addresses.
    V6,
}

/// Link-layer primitives the driver needs from the kernel.
#[async_trait]
pub trait KernelLinks: Send + Sync {
    /// Look up a link by name. `Ok(None)` when no such link exists.
    async fn link_by_name(&self, name: &str) -> DriverResult<Option<Link>>;

    /// Create a bridge device.
    async fn add_bridge(&self, name: &str) -> DriverResult<Link>;

    /// Create a veth pair.
    async fn add_veth(&self, name: &str, peer: &str) -> DriverResult<()>;

    /// Delete a link. Deleting one end of a veth pair removes both ends.
    async fn delete_link(&self, link: &Link) -> DriverResult<()>;

    /// Set the MTU of a link.
    async fn set_mtu(&self, link: &Link, mtu: u32) -> DriverResult<()>;

    /// Attach a link to a bridge.
    async fn set_master(&self, link: &Link, bridge: &Link) -> DriverResult<()>;

    /// Set the hardware address of a link.
    async fn set_hardware_addr(&self, link: &Link, mac: MacAddress) -> DriverResult<()>;

    /// Bring a link administratively up.
    async fn set_up(&self, link: &Link) -> DriverResult<()>;

    /// Toggle hairpin mode on a bridge port.
    async fn set_hairpin(&self, link: &Link, enable: bool) -> DriverResult<()>;

    /// Addresses configured on a link.
    async fn addresses(&self, link: &Link, family: AddressFamily) -> DriverResult<Vec<IpNet>>;

    /// Enter the host namespace for the duration of an operation.
    fn enter_host_namespace(&self) -> DriverResult<NamespaceGuard>;
}
