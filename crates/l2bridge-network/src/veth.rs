//! Virtual ethernet pair naming.

use l2bridge_common::id::random_hex;
use l2bridge_common::{DriverError, DriverResult};

use crate::links::KernelLinks;

/// Prefix of every veth interface the driver creates.
pub const VETH_PREFIX: &str = "veth";

/// Number of random hex characters after [`VETH_PREFIX`].
pub const VETH_LEN: usize = 7;

const MAX_NAME_ATTEMPTS: usize = 3;

/// Generate an interface name that no existing link uses.
pub async fn generate_iface_name(
    links: &dyn KernelLinks,
    prefix: &str,
    len: usize,
) -> DriverResult<String> {
    for _ in 0..MAX_NAME_ATTEMPTS {
        let name = format!("{prefix}{}", random_hex(len));
        if links.link_by_name(&name).await?.is_none() {
            return Ok(name);
        }
        tracing::debug!(name, "Interface name already taken, retrying");
    }
    Err(DriverError::internal(format!(
        "could not generate a unique interface name with prefix {prefix}"
    )))
}

/// Generate distinct names for the host and sandbox ends of a veth pair.
pub async fn generate_pair_names(links: &dyn KernelLinks) -> DriverResult<(String, String)> {
    let host = generate_iface_name(links, VETH_PREFIX, VETH_LEN).await?;
    loop {
        let sandbox = generate_iface_name(links, VETH_PREFIX, VETH_LEN).await?;
        if sandbox != host {
            return Ok((host, sandbox));
        }
    }
}
