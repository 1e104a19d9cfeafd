//! rtnetlink-backed implementation of [`KernelLinks`].

use std::path::PathBuf;

use async_trait::async_trait;
use futures::TryStreamExt;
use ipnet::IpNet;
use l2bridge_common::{DriverError, DriverResult};
use netlink_packet_route::address::{AddressAttribute, AddressMessage};
use netlink_packet_route::link::{InfoKind, LinkAttribute, LinkFlags, LinkInfo, LinkMessage};
use rtnetlink::{LinkBridge, LinkUnspec, LinkVeth};

use crate::links::{AddressFamily, KernelLinks, Link, LinkKind};
use crate::mac::MacAddress;
use crate::netns::{HostNamespace, NamespaceGuard};

const SYSFS_NET: &str = "/sys/class/net";

/// Persistent netlink handle used for all bridge and veth operations.
pub struct NetlinkHandle {
    handle: rtnetlink::Handle,
    host: HostNamespace,
    // Keeps the connection task alive
    _conn_task: tokio::task::JoinHandle<()>,
}

impl NetlinkHandle {
    /// Open a netlink connection in the current (host) namespace.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new() -> DriverResult<Self> {
        let host = HostNamespace::capture()?;
        let (conn, handle, _) = rtnetlink::new_connection()
            .map_err(|e| DriverError::internal(format!("failed to open netlink socket: {e}")))?;
        let conn_task = tokio::spawn(conn);
        Ok(Self {
            handle,
            host,
            _conn_task: conn_task,
        })
    }

    async fn set(&self, message: LinkMessage, what: &str, name: &str) -> DriverResult<()> {
        self.handle
            .link()
            .set(message)
            .execute()
            .await
            .map_err(|e| DriverError::internal(format!("failed to set {what} on {name}: {e}")))
    }
}

impl std::fmt::Debug for NetlinkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetlinkHandle")
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl KernelLinks for NetlinkHandle {
    async fn link_by_name(&self, name: &str) -> DriverResult<Option<Link>> {
        let mut links = self
            .handle
            .link()
            .get()
            .match_name(name.to_string())
            .execute();

        match links.try_next().await {
            Ok(Some(msg)) => Ok(Some(link_from_message(&msg))),
            Ok(None) => Ok(None),
            // rtnetlink reports a missing link as an error on most kernels
            Err(e) if e.to_string().contains("No such device") => Ok(None),
            Err(e) => Err(DriverError::internal(format!(
                "failed to look up link {name}: {e}"
            ))),
        }
    }

    async fn add_bridge(&self, name: &str) -> DriverResult<Link> {
        tracing::debug!(name, "Creating bridge");
        self.handle
            .link()
            .add(LinkBridge::new(name).build())
            .execute()
            .await
            .map_err(|e| DriverError::internal(format!("failed to create bridge {name}: {e}")))?;

        self.link_by_name(name).await?.ok_or_else(|| {
            DriverError::internal(format!("bridge {name} vanished after creation"))
        })
    }

    async fn add_veth(&self, name: &str, peer: &str) -> DriverResult<()> {
        tracing::debug!(name, peer, "Creating veth pair");
        self.handle
            .link()
            .add(LinkVeth::new(name, peer).build())
            .execute()
            .await
            .map_err(|e| {
                DriverError::internal(format!(
                    "failed to add the host ({name}) <=> sandbox ({peer}) pair interfaces: {e}"
                ))
            })
    }

    async fn delete_link(&self, link: &Link) -> DriverResult<()> {
        tracing::debug!(name = %link.name, "Deleting link");
        match self.handle.link().del(link.index).execute().await {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("No such device") => Ok(()),
            Err(e) => Err(DriverError::internal(format!(
                "failed to delete link {}: {e}",
                link.name
            ))),
        }
    }

    async fn set_mtu(&self, link: &Link, mtu: u32) -> DriverResult<()> {
        let message = LinkUnspec::new_with_index(link.index).mtu(mtu).build();
        self.set(message, "MTU", &link.name).await
    }

    async fn set_master(&self, link: &Link, bridge: &Link) -> DriverResult<()> {
        let message = LinkUnspec::new_with_index(link.index)
            .controller(bridge.index)
            .build();
        self.set(message, "master", &link.name).await
    }

    async fn set_hardware_addr(&self, link: &Link, mac: MacAddress) -> DriverResult<()> {
        let message = LinkUnspec::new_with_index(link.index)
            .address(mac.octets().to_vec())
            .build();
        self.set(message, "hardware address", &link.name).await
    }

    async fn set_up(&self, link: &Link) -> DriverResult<()> {
        let message = LinkUnspec::new_with_index(link.index).up().build();
        self.set(message, "link up", &link.name).await
    }

    // The bridge port flag is written through sysfs only; the netlink
    // IFLA_PROTINFO path is not used.
    async fn set_hairpin(&self, link: &Link, enable: bool) -> DriverResult<()> {
        let path: PathBuf = [SYSFS_NET, &link.name, "brport", "hairpin_mode"]
            .iter()
            .collect();
        let value: &[u8] = if enable { b"1\n" } else { b"0\n" };
        tokio::fs::write(&path, value).await.map_err(|e| {
            DriverError::internal(format!(
                "unable to set hairpin mode on {} via sysfs: {e}",
                link.name
            ))
        })
    }

    async fn addresses(&self, link: &Link, family: AddressFamily) -> DriverResult<Vec<IpNet>> {
        let mut stream = self
            .handle
            .address()
            .get()
            .set_link_index_filter(link.index)
            .execute();

        let mut out = Vec::new();
        while let Some(msg) = stream.try_next().await.map_err(|e| {
            DriverError::internal(format!(
                "failed to retrieve addresses of {}: {e}",
                link.name
            ))
        })? {
            if let Some(net) = address_from_message(&msg) {
                let matches = match family {
                    AddressFamily::V4 => net.addr().is_ipv4(),
                    AddressFamily::V6 => net.addr().is_ipv6(),
                };
                if matches {
                    out.push(net);
                }
            }
        }
        Ok(out)
    }

    fn enter_host_namespace(&self) -> DriverResult<NamespaceGuard> {
        self.host.enter()
    }
}

fn link_from_message(msg: &LinkMessage) -> Link {
    let mut name = String::new();
    let mut kind = LinkKind::Other(String::new());

    for attr in &msg.attributes {
        match attr {
            LinkAttribute::IfName(n) => name.clone_from(n),
            LinkAttribute::LinkInfo(infos) => {
                for info in infos {
                    if let LinkInfo::Kind(k) = info {
                        kind = match k {
                            InfoKind::Bridge => LinkKind::Bridge,
                            InfoKind::Veth => LinkKind::Veth,
                            other => LinkKind::Other(format!("{other:?}").to_lowercase()),
                        };
                    }
                }
            }
            _ => {}
        }
    }

    Link {
        index: msg.header.index,
        name,
        kind,
        up: msg.header.flags.contains(LinkFlags::Up),
    }
}

fn address_from_message(msg: &AddressMessage) -> Option<IpNet> {
    let prefix_len = msg.header.prefix_len;
    msg.attributes.iter().find_map(|attr| match attr {
        AddressAttribute::Address(ip) => IpNet::new(*ip, prefix_len).ok(),
        _ => None,
    })
}
