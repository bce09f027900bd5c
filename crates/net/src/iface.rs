use crate::wire::{ipv6_multicast_mac, solicited_node_multicast, Mac};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;

/// Deserialized interface configuration, as written in the config file.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct IfaceConfig {
    pub name: String,
    pub mac: Mac,
    /// IPv4 address and prefix length; enables ARP service when present.
    pub ipv4: Option<Ipv4Addr>,
    #[serde(default = "default_v4_prefix")]
    pub ipv4_prefix: u8,
    /// Global IPv6 address and prefix length; enables ND service when
    /// present.
    pub ipv6: Option<Ipv6Addr>,
    #[serde(default = "default_v6_prefix")]
    pub ipv6_prefix: u8,
    #[serde(with = "humantime_serde", default = "default_neigh_timeout")]
    pub arp_cache_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_neigh_timeout")]
    pub nd_cache_timeout: Duration,
}

fn default_v4_prefix() -> u8 {
    24
}
fn default_v6_prefix() -> u8 {
    64
}
fn default_neigh_timeout() -> Duration {
    Duration::from_secs(60 * 15)
}

/// A configured interface with its derived link-layer addressing.
/// `front` faces untrusted clients; `back` faces the protected network.
#[derive(Debug, Clone)]
pub struct Iface {
    pub name: String,
    pub mac: Mac,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv4_prefix: u8,
    pub ipv6: Option<Ipv6Addr>,
    pub ipv6_prefix: u8,
    /// Link-local address derived from the MAC (EUI-64).
    pub ll_ipv6: Option<Ipv6Addr>,
    /// Solicited-node multicast groups of the global and link-local
    /// addresses, and their Ethernet multicast mappings. The NIC is
    /// programmed to accept these; the LLS worker validates against them.
    pub ipv6_mc: Option<Ipv6Addr>,
    pub ll_ipv6_mc: Option<Ipv6Addr>,
    pub eth_mc: Option<Mac>,
    pub ll_eth_mc: Option<Mac>,
    pub arp_cache_timeout: Duration,
    pub nd_cache_timeout: Duration,
}

impl Iface {
    pub fn new(config: IfaceConfig) -> Self {
        let ll_ipv6 = config.ipv6.map(|_| link_local_from_mac(&config.mac));
        let ipv6_mc = config.ipv6.map(|ip| solicited_node_multicast(&ip));
        let ll_ipv6_mc = ll_ipv6.map(|ip| solicited_node_multicast(&ip));

        Self {
            name: config.name,
            mac: config.mac,
            ipv4: config.ipv4,
            ipv4_prefix: config.ipv4_prefix,
            ipv6: config.ipv6,
            ipv6_prefix: config.ipv6_prefix,
            ll_ipv6,
            ipv6_mc,
            ll_ipv6_mc,
            eth_mc: ipv6_mc.map(|ip| ipv6_multicast_mac(&ip)),
            ll_eth_mc: ll_ipv6_mc.map(|ip| ipv6_multicast_mac(&ip)),
            arp_cache_timeout: config.arp_cache_timeout,
            nd_cache_timeout: config.nd_cache_timeout,
        }
    }

    pub fn arp_enabled(&self) -> bool {
        self.ipv4.is_some()
    }

    pub fn nd_enabled(&self) -> bool {
        self.ipv6.is_some()
    }

    pub fn ipv4_in_subnet(&self, ip: &Ipv4Addr) -> bool {
        let Some(our) = self.ipv4 else { return false };
        let mask = prefix_mask_v4(self.ipv4_prefix);
        u32::from(our) & mask == u32::from(*ip) & mask
    }

    pub fn ipv6_in_subnet(&self, ip: &Ipv6Addr) -> bool {
        let Some(our) = self.ipv6 else { return false };
        let mask = prefix_mask_v6(self.ipv6_prefix);
        u128::from(our) & mask == u128::from(*ip) & mask
    }

    /// Whether a received frame's destination MAC is for this interface:
    /// broadcast, the interface address, or one of its multicast mappings.
    /// Bonded slave interfaces assume the bond's MAC, so the interface
    /// address check covers those too.
    pub fn accepts_dst_mac(&self, mac: &Mac) -> bool {
        mac.is_broadcast()
            || *mac == self.mac
            || Some(*mac) == self.eth_mc
            || Some(*mac) == self.ll_eth_mc
    }

    /// Whether an IPv6 destination is one of the four addresses neighbor
    /// discovery may target on this interface: global, link-local, or
    /// either solicited-node multicast group.
    pub fn nd_destination(&self, ip: &Ipv6Addr) -> bool {
        Some(*ip) == self.ipv6
            || Some(*ip) == self.ll_ipv6
            || Some(*ip) == self.ipv6_mc
            || Some(*ip) == self.ll_ipv6_mc
    }
}

/// EUI-64 link-local address of a MAC (RFC 4291 appendix A).
fn link_local_from_mac(mac: &Mac) -> Ipv6Addr {
    let m = mac.octets();
    let mut o = [0u8; 16];
    o[0] = 0xfe;
    o[1] = 0x80;
    o[8] = m[0] ^ 0x02;
    o[9] = m[1];
    o[10] = m[2];
    o[11] = 0xff;
    o[12] = 0xfe;
    o[13] = m[3];
    o[14] = m[4];
    o[15] = m[5];
    Ipv6Addr::from(o)
}

fn prefix_mask_v4(prefix: u8) -> u32 {
    match prefix {
        0 => 0,
        p if p >= 32 => u32::MAX,
        p => u32::MAX << (32 - p),
    }
}

fn prefix_mask_v6(prefix: u8) -> u128 {
    match prefix {
        0 => 0,
        p if p >= 128 => u128::MAX,
        p => u128::MAX << (128 - p),
    }
}

/// Which of the two logical interfaces a frame or queue belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IfaceSide {
    Front,
    Back,
}

/// The two logical interfaces of the dataplane.
#[derive(Debug, Clone)]
pub struct NetConfig {
    pub front: Iface,
    pub back: Iface,
    pub back_enabled: bool,
}

impl NetConfig {
    pub fn new(front: Iface, back: Iface) -> Self {
        Self {
            front,
            back,
            back_enabled: true,
        }
    }

    pub fn iface(&self, side: IfaceSide) -> &Iface {
        match side {
            IfaceSide::Front => &self.front,
            IfaceSide::Back => &self.back,
        }
    }

    /// ARP service runs when either interface has an IPv4 address.
    pub fn arp_enabled(&self) -> bool {
        self.front.arp_enabled() || (self.back_enabled && self.back.arp_enabled())
    }

    /// ND service runs when either interface has an IPv6 address.
    pub fn nd_enabled(&self) -> bool {
        self.front.nd_enabled() || (self.back_enabled && self.back.nd_enabled())
    }
}

/// Sequential RX/TX queue-id assignment for one interface. Each worker
/// claims its queues during setup; the ids index into the PollPort.
#[derive(Debug, Default)]
pub struct QueueAllocator {
    next_rx: u16,
    next_tx: u16,
}

impl QueueAllocator {
    pub fn assign_rx(&mut self) -> u16 {
        let id = self.next_rx;
        self.next_rx += 1;
        id
    }

    pub fn assign_tx(&mut self) -> u16 {
        let id = self.next_tx;
        self.next_tx += 1;
        id
    }

    pub fn rx_count(&self) -> u16 {
        self.next_rx
    }
}

impl std::str::FromStr for Mac {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split(':');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(|| format!("bad MAC '{s}'"))?;
            *octet = u8::from_str_radix(part, 16).map_err(|_| format!("bad MAC '{s}'"))?;
        }
        if parts.next().is_some() {
            return Err(format!("bad MAC '{s}'"));
        }
        Ok(Mac(octets))
    }
}

impl<'de> serde::Deserialize<'de> for Mac {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn test_iface() -> Iface {
        Iface::new(IfaceConfig {
            name: "front".to_string(),
            mac: "02:00:00:00:00:01".parse().unwrap(),
            ipv4: Some("10.0.0.1".parse().unwrap()),
            ipv4_prefix: 24,
            ipv6: Some("2001:db8::1".parse().unwrap()),
            ipv6_prefix: 64,
            arp_cache_timeout: Duration::from_secs(30),
            nd_cache_timeout: Duration::from_secs(30),
        })
    }

    #[test]
    fn test_derived_addresses() {
        let iface = test_iface();
        assert_eq!(
            iface.ll_ipv6,
            Some("fe80::ff:fe00:1".parse::<Ipv6Addr>().unwrap())
        );
        assert_eq!(
            iface.ipv6_mc,
            Some("ff02::1:ff00:1".parse::<Ipv6Addr>().unwrap())
        );
        assert_eq!(iface.eth_mc, Some(Mac([0x33, 0x33, 0xff, 0, 0, 1])));
    }

    #[test]
    fn test_subnet_membership() {
        let iface = test_iface();
        assert!(iface.ipv4_in_subnet(&"10.0.0.77".parse().unwrap()));
        assert!(!iface.ipv4_in_subnet(&"10.0.1.77".parse().unwrap()));
        assert!(iface.ipv6_in_subnet(&"2001:db8::42".parse().unwrap()));
        assert!(!iface.ipv6_in_subnet(&"2001:db9::42".parse().unwrap()));
    }

    #[test]
    fn test_mac_validation() {
        let iface = test_iface();
        assert!(iface.accepts_dst_mac(&Mac::BROADCAST));
        assert!(iface.accepts_dst_mac(&iface.mac));
        assert!(iface.accepts_dst_mac(&iface.eth_mc.unwrap()));
        assert!(iface.accepts_dst_mac(&iface.ll_eth_mc.unwrap()));
        assert!(!iface.accepts_dst_mac(&Mac([2, 0, 0, 0, 0, 99])));
    }

    #[test]
    fn test_nd_destination() {
        let iface = test_iface();
        assert!(iface.nd_destination(&iface.ipv6.unwrap()));
        assert!(iface.nd_destination(&iface.ll_ipv6.unwrap()));
        assert!(iface.nd_destination(&iface.ipv6_mc.unwrap()));
        assert!(iface.nd_destination(&iface.ll_ipv6_mc.unwrap()));
        assert!(!iface.nd_destination(&"2001:db8::99".parse().unwrap()));
    }

    #[test]
    fn test_mac_parse() {
        assert_eq!(
            "aa:bb:cc:dd:ee:ff".parse::<Mac>().unwrap(),
            Mac([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff])
        );
        assert!("aa:bb:cc".parse::<Mac>().is_err());
        assert!("aa:bb:cc:dd:ee:ff:00".parse::<Mac>().is_err());
    }
}
