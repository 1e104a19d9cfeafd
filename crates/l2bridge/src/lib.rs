//! # l2bridge
//!
//! Core of the layer-2 bridge network driver.
//!
//! Every network is a Linux bridge device; every endpoint is a veth pair
//! whose host side is attached to that bridge. The driver keeps its
//! networks and endpoints in memory, derives MAC and IPv6 addresses for
//! endpoints that did not ask for one, and installs a single forwarding
//! rule per bridge. Kernel access goes through the traits of
//! [`l2bridge_network`], so the whole lifecycle can run against fakes.
//!
//! ```no_run
//! use l2bridge::{BridgeDriver, Configuration};
//!
//! # async fn run() -> l2bridge_common::DriverResult<()> {
//! let driver = BridgeDriver::host(Configuration::default())?;
//! driver.configure(Configuration::default()).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod address;
pub mod bridge;
pub mod config;
pub mod driver;
pub mod endpoint;
pub mod firewall;
pub mod ipam;
pub mod registry;
pub mod rollback;
pub mod setup;

pub use config::{Configuration, NetworkConfiguration, Options};
pub use driver::BridgeDriver;
pub use endpoint::{EndpointInterface, InterfaceName, JoinInfo, RawEndpointInterface};
pub use ipam::{IpamData, RawIpamData};
