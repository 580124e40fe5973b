//! Interface facts for the status screens, read through `sysinfo` plus sysfs link state.

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use sysinfo::Networks;

pub const SYSFS_NET: &str = "/sys/class/net";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub name: String,
    pub ipv4: Option<Ipv4Addr>,
    pub prefix: u8,
    pub mac: String,
}

impl InterfaceInfo {
    pub fn is_loopback(&self) -> bool {
        self.name == "lo" || self.ipv4.is_some_and(|ip| ip.is_loopback())
    }

    /// Dotted netmask for `prefix`, when an address is assigned.
    pub fn netmask(&self) -> Option<Ipv4Addr> {
        self.ipv4?;
        let bits = match self.prefix {
            0 => 0,
            p => u32::MAX << (32 - u32::from(p.min(32))),
        };
        Some(Ipv4Addr::from(bits))
    }
}

/// Every interface the kernel reports, sorted by name.
pub fn interfaces() -> Vec<InterfaceInfo> {
    let networks = Networks::new_with_refreshed_list();
    let mut list: Vec<InterfaceInfo> = networks
        .iter()
        .map(|(name, data)| {
            let v4 = data.ip_networks().iter().find_map(|net| match net.addr {
                IpAddr::V4(addr) => Some((addr, net.prefix)),
                IpAddr::V6(_) => None,
            });
            InterfaceInfo {
                name: name.clone(),
                ipv4: v4.map(|(addr, _)| addr),
                prefix: v4.map(|(_, prefix)| prefix).unwrap_or(0),
                mac: data.mac_address().to_string(),
            }
        })
        .collect();
    list.sort_by(|a, b| a.name.cmp(&b.name));
    list
}

/// First non-loopback interface with an IPv4 address.
pub fn primary() -> Option<InterfaceInfo> {
    interfaces()
        .into_iter()
        .find(|i| !i.is_loopback() && i.ipv4.is_some())
}

pub fn local_ipv4() -> Option<Ipv4Addr> {
    primary().and_then(|i| i.ipv4)
}

/// `operstate` is `up` under `root`.
pub fn link_up(root: &Path, name: &str) -> bool {
    std::fs::read_to_string(root.join(name).join("operstate"))
        .map(|s| s.trim() == "up")
        .unwrap_or(false)
}
