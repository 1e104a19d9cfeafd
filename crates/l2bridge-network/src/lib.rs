//! # l2bridge-network
//!
//! Kernel primitives for the l2bridge driver.
//!
//! This crate wraps everything the driver core needs from the host: link
//! manipulation over netlink, boolean kernel parameters, packet filter
//! rules and the host network namespace context.

#![warn(missing_docs)]

pub mod iptables;
pub mod links;
pub mod mac;
pub mod netlink;
pub mod netns;
pub mod ports;
pub mod sysctl;
pub mod veth;

#[cfg(any(test, feature = "fake"))]
pub mod fake;

pub use iptables::{Action, Iptables, PacketFilter, ReloadHook, Table};
pub use links::{AddressFamily, KernelLinks, Link, LinkKind};
pub use mac::MacAddress;
pub use netlink::NetlinkHandle;
pub use netns::{HostNamespace, NamespaceGuard};
pub use ports::{Protocol, TransportPort, parse_transport_ports};
pub use sysctl::SysctlTree;
