use anyhow::Result;
use if_addrs::{get_if_addrs, IfAddr};
use ipnet::{IpNet, Ipv4Net};
use std::collections::HashSet;
use std::net::Ipv4Addr;

/// Parse a CIDR string, keeping only IPv4 blocks.
///
/// Host bits may be set (`192.168.1.7/24` is the `192.168.1.0/24` block).
/// Anything unparseable or IPv6 yields `None`.
pub fn parse_ipv4_network(network: &str) -> Option<Ipv4Net> {
    match network.trim().parse::<IpNet>().ok()? {
        IpNet::V4(n4) => Some(n4),
        IpNet::V6(_) => None,
    }
}

/// Every address from network + 1 through the broadcast address inclusive.
///
/// The broadcast address is dialed too; daemons never listen there, so the
/// extra attempt simply fails. Addresses are produced lazily, so even a /0
/// costs nothing until it is walked.
pub fn candidate_hosts(net: Ipv4Net) -> impl Iterator<Item = Ipv4Addr> {
    let start = u32::from(net.network());
    let end = u32::from(net.broadcast());
    (start..=end).skip(1).map(Ipv4Addr::from)
}

/// Detect local non-loopback IPv4 addresses and convert each to a default /24 CIDR network.
///
/// For example, an interface IP `192.168.1.42` becomes `192.168.1.0/24`.
/// Duplicates are removed.
pub fn detect_local_cidrs() -> Result<Vec<Ipv4Net>> {
    let mut set = HashSet::<Ipv4Net>::new();
    for iface in get_if_addrs()? {
        if let IfAddr::V4(v4) = iface.addr {
            if v4.ip.is_loopback() {
                continue;
            }
            set.insert(ipv4_to_default_cidr(v4.ip));
        }
    }
    let mut cidrs: Vec<Ipv4Net> = set.into_iter().collect();
    // Sort for stable output
    cidrs.sort_by_key(|n| (u32::from(n.network()), n.prefix_len()));
    Ok(cidrs)
}

/// Helper: convert an IPv4 address into its default /24 network.
pub fn ipv4_to_default_cidr(ip: Ipv4Addr) -> Ipv4Net {
    let o = ip.octets();
    Ipv4Net::new(Ipv4Addr::new(o[0], o[1], o[2], 0), 24).expect("/24 is always valid")
}
