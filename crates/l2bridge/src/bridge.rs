//! The bridge device backing a network.

use ipnet::IpNet;
use l2bridge_common::{DriverError, DriverResult};
use l2bridge_network::{AddressFamily, KernelLinks, Link};

/// A network's bridge device, which may not exist yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeInterface {
    name: String,
    link: Option<Link>,
}

impl BridgeInterface {
    /// A bridge that has not been looked up or created yet.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            link: None,
        }
    }

    /// Look up the bridge named `name`.
    ///
    /// A missing device is not an error; an existing device that is not a
    /// bridge is.
    pub async fn lookup(links: &dyn KernelLinks, name: &str) -> DriverResult<Self> {
        let link = links.link_by_name(name).await?;
        match &link {
            Some(link) if !link.is_bridge() => {
                return Err(DriverError::internal(format!(
                    "existing interface {name} is not a bridge"
                )));
            }
            Some(_) => {}
            None => tracing::debug!(name, "Did not find any interface with this name"),
        }
        Ok(Self {
            name: name.to_string(),
            link,
        })
    }

    /// Name of the device.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the device exists on the host.
    #[must_use]
    pub const fn exists(&self) -> bool {
        self.link.is_some()
    }

    /// The kernel link, once the device exists.
    #[must_use]
    pub const fn link(&self) -> Option<&Link> {
        self.link.as_ref()
    }

    /// The kernel link, or an error when the device was never created.
    pub fn require_link(&self) -> DriverResult<&Link> {
        self.link
            .as_ref()
            .ok_or_else(|| DriverError::internal(format!("bridge {} does not exist", self.name)))
    }

    /// Record the kernel link after the device was created or refreshed.
    pub fn set_link(&mut self, link: Link) {
        self.link = Some(link);
    }

    /// IPv4 and IPv6 addresses configured on the bridge.
    pub async fn addresses(&self, links: &dyn KernelLinks) -> DriverResult<(Vec<IpNet>, Vec<IpNet>)> {
        let link = self.require_link()?;
        let v4 = links.addresses(link, AddressFamily::V4).await.map_err(|e| {
            DriverError::internal(format!("Failed to retrieve V4 addresses: {e}"))
        })?;
        let v6 = links.addresses(link, AddressFamily::V6).await.map_err(|e| {
            DriverError::internal(format!("Failed to retrieve V6 addresses: {e}"))
        })?;
        Ok((v4, v6))
    }
}

/// Whether a bridge named `name` exists.
///
/// An existing link of another type is reported as an error.
pub async fn bridge_interface_exists(links: &dyn KernelLinks, name: &str) -> DriverResult<bool> {
    match links.link_by_name(name).await {
        Ok(Some(link)) if link.is_bridge() => Ok(true),
        Ok(Some(_)) => Err(DriverError::internal(format!(
            "existing interface {name} is not a bridge"
        ))),
        Ok(None) => Ok(false),
        Err(e) => Err(DriverError::internal(format!(
            "failed to check bridge interface existence: {e}"
        ))),
    }
}
