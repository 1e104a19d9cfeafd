//! Endpoint MAC and IPv6 address derivation.
//!
//! A MAC address that is not supplied by the user is derived from the
//! endpoint's IPv4 address, so re-creating an endpoint with the same
//! address always yields the same MAC. The IPv6 address embeds the MAC in
//! the low 48 bits of the network's IPv6 prefix.

use std::net::Ipv6Addr;

use ipnet::{Ipv4Net, Ipv6Net};
use l2bridge_common::{DriverError, DriverResult};
use l2bridge_network::MacAddress;

/// Longest IPv6 prefix that leaves room for a MAC address.
pub const MAX_DERIVED_IPV6_PREFIX: u8 = 80;

/// Pick the MAC address of an endpoint.
///
/// Returns the address and whether it was generated by the driver.
#[must_use]
pub fn endpoint_mac(requested: Option<MacAddress>, addr: Option<Ipv4Net>) -> (MacAddress, bool) {
    match (requested, addr) {
        (Some(mac), _) => (mac, false),
        (None, Some(addr)) => (MacAddress::from_ipv4(addr.addr()), true),
        (None, None) => (MacAddress::random(), true),
    }
}

/// Build an IPv6 address from `pool` with its last six bytes replaced by
/// `mac`.
pub fn derive_ipv6(pool: Ipv6Net, mac: MacAddress) -> DriverResult<Ipv6Net> {
    if pool.prefix_len() > MAX_DERIVED_IPV6_PREFIX {
        return Err(DriverError::forbidden(format!(
            "Cannot self generate an IPv6 address on network {pool}: At least 48 host bits are needed."
        )));
    }

    let mut octets = pool.network().octets();
    octets[10..].copy_from_slice(&mac.octets());
    Ipv6Net::new(Ipv6Addr::from(octets), pool.prefix_len())
        .map_err(|e| DriverError::internal(format!("failed to build IPv6 address: {e}")))
}
