//! Self-address discovery

use nixie_core::{Error, Result};
use std::net::{IpAddr, Ipv4Addr};

/// The first non-loopback, non-link-local IPv4 address on any interface
pub(crate) fn self_ipv4() -> Result<Ipv4Addr> {
    let interfaces = if_addrs::get_if_addrs()
        .map_err(|e| Error::internal(format!("error listing network interfaces: {e}")))?;

    for interface in interfaces {
        if interface.is_loopback() {
            continue;
        }
        if let IpAddr::V4(v4) = interface.ip() {
            if v4.is_link_local() {
                continue;
            }
            return Ok(v4);
        }
    }

    Err(Error::internal("could not discover a self IPv4 address"))
}
