//! Network path selection
//!
//! Sources:
//! - /sys/class/net (interface kind, operstate)
//! - /proc/net/route, /proc/net/ipv6_route (default route => Internet capable)
//! - getifaddrs (local address used to pin traffic to the chosen path)

use std::collections::BTreeMap;
use std::fs;
use std::net::{IpAddr, SocketAddrV4, SocketAddrV6};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Kind of network path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    Wifi,
    Ethernet,
    Cellular,
    Other,
}

impl PathKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PathKind::Wifi => "wifi",
            PathKind::Ethernet => "ethernet",
            PathKind::Cellular => "cellular",
            PathKind::Other => "other",
        }
    }
}

/// One network path the device currently knows about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkPath {
    pub interface: String,
    pub kind: PathKind,
    /// Flagged as able to reach the Internet
    pub internet: bool,
    /// Source address that pins requests to this path
    pub local_addr: Option<IpAddr>,
}

/// Platform connectivity enumeration
pub trait ConnectivityProvider: Send + Sync {
    fn paths(&self) -> Vec<NetworkPath>;
}

/// Pick the path updates should travel over.
///
/// First Internet-capable Wi-Fi path, else the first Internet-capable path
/// of any kind, else None.
pub fn choose_path(paths: &[NetworkPath]) -> Option<NetworkPath> {
    paths
        .iter()
        .find(|p| p.kind == PathKind::Wifi && p.internet)
        .or_else(|| paths.iter().find(|p| p.internet))
        .cloned()
}

/// Chooses a network path with verified Internet capability
#[derive(Clone)]
pub struct NetworkSelector {
    provider: Arc<dyn ConnectivityProvider>,
}

impl NetworkSelector {
    pub fn new(provider: Arc<dyn ConnectivityProvider>) -> Self {
        Self { provider }
    }

    pub fn select_internet_path(&self) -> Option<NetworkPath> {
        let paths = self.provider.paths();
        let chosen = choose_path(&paths);
        match &chosen {
            Some(p) => debug!("Selected {} path {} ({} known)", p.kind.as_str(), p.interface, paths.len()),
            None => debug!("No Internet-capable path among {} known", paths.len()),
        }
        chosen
    }
}

/// Fixed path list, for tests and for devices whose connectivity is
/// configured out of band.
impl ConnectivityProvider for Vec<NetworkPath> {
    fn paths(&self) -> Vec<NetworkPath> {
        self.clone()
    }
}

/// Linux connectivity enumeration from sysfs/procfs
pub struct SysfsConnectivity {
    root: PathBuf,
    resolve_addresses: bool,
}

impl SysfsConnectivity {
    pub fn new() -> Self {
        Self {
            root: PathBuf::from("/"),
            resolve_addresses: true,
        }
    }

    /// Read sysfs/procfs below `root` instead of `/`; addresses are not resolved.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            resolve_addresses: false,
        }
    }

    fn sys_class_net(&self) -> PathBuf {
        self.root.join("sys/class/net")
    }

    fn kind_of(&self, iface: &str) -> PathKind {
        let dir = self.sys_class_net().join(iface);
        if dir.join("wireless").exists() || dir.join("phy80211").exists() {
            return PathKind::Wifi;
        }
        let lower = iface.to_lowercase();
        if lower.starts_with("wwan") || lower.starts_with("rmnet") || lower.starts_with("ccmni") {
            return PathKind::Cellular;
        }
        let arp_type = fs::read_to_string(dir.join("type")).unwrap_or_default();
        if arp_type.trim() == "1" && (dir.join("device").exists() || lower.starts_with("eth") || lower.starts_with("en")) {
            return PathKind::Ethernet;
        }
        PathKind::Other
    }

    fn is_up(&self, iface: &str) -> bool {
        let state = fs::read_to_string(self.sys_class_net().join(iface).join("operstate")).unwrap_or_default();
        matches!(state.trim(), "up" | "unknown")
    }

    /// Interfaces carrying a default route
    fn default_route_ifaces(&self) -> Vec<String> {
        let mut ifaces = Vec::new();

        if let Ok(content) = fs::read_to_string(self.root.join("proc/net/route")) {
            ifaces.extend(parse_ipv4_default_routes(&content));
        }
        if let Ok(content) = fs::read_to_string(self.root.join("proc/net/ipv6_route")) {
            ifaces.extend(parse_ipv6_default_routes(&content));
        }

        ifaces.sort();
        ifaces.dedup();
        ifaces
    }

    fn local_addresses(&self) -> BTreeMap<String, IpAddr> {
        let mut addrs = BTreeMap::new();
        if !self.resolve_addresses {
            return addrs;
        }

        let iter = match nix::ifaddrs::getifaddrs() {
            Ok(iter) => iter,
            Err(e) => {
                warn!("getifaddrs failed: {}", e);
                return addrs;
            }
        };

        for ifa in iter {
            let Some(storage) = ifa.address else { continue };
            let ip = if let Some(sin) = storage.as_sockaddr_in() {
                IpAddr::V4(*SocketAddrV4::from(*sin).ip())
            } else if let Some(sin6) = storage.as_sockaddr_in6() {
                let ip = *SocketAddrV6::from(*sin6).ip();
                // Link-local v6 needs a scope id; not usable as a bind address here
                if (ip.segments()[0] & 0xffc0) == 0xfe80 {
                    continue;
                }
                IpAddr::V6(ip)
            } else {
                continue;
            };
            if ip.is_loopback() {
                continue;
            }
            // Prefer IPv4 when an interface has both
            let entry = addrs.entry(ifa.interface_name.clone()).or_insert(ip);
            if entry.is_ipv6() && ip.is_ipv4() {
                *entry = ip;
            }
        }
        addrs
    }
}

impl Default for SysfsConnectivity {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectivityProvider for SysfsConnectivity {
    fn paths(&self) -> Vec<NetworkPath> {
        let entries = match fs::read_dir(self.sys_class_net()) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot enumerate {}: {}", self.sys_class_net().display(), e);
                return Vec::new();
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|n| n != "lo")
            .collect();
        names.sort();

        let routed = self.default_route_ifaces();
        let addrs = self.local_addresses();

        names
            .into_iter()
            .map(|name| {
                let internet = self.is_up(&name) && routed.contains(&name);
                NetworkPath {
                    kind: self.kind_of(&name),
                    internet,
                    local_addr: addrs.get(&name).copied(),
                    interface: name,
                }
            })
            .collect()
    }
}

/// Interfaces with an active IPv4 default route (`/proc/net/route`)
fn parse_ipv4_default_routes(content: &str) -> Vec<String> {
    const RTF_UP: u32 = 0x1;
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 4 || cols[1] != "00000000" {
                return None;
            }
            let flags = u32::from_str_radix(cols[3], 16).unwrap_or(0);
            (flags & RTF_UP != 0).then(|| cols[0].to_string())
        })
        .collect()
}

/// Interfaces with an IPv6 default route (`/proc/net/ipv6_route`)
fn parse_ipv6_default_routes(content: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 10 {
                return None;
            }
            let is_default = cols[0].chars().all(|c| c == '0') && cols[1] == "00";
            let iface = cols[9];
            (is_default && iface != "lo").then(|| iface.to_string())
        })
        .collect()
}
