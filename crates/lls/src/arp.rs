//! ARP: the IPv4 face of the neighbor cache.

use crate::cache::{NeighborCache, NeighborProto};
use bytes::BytesMut;
use net::wire::{self, Arp};
use net::{Iface, IfaceSide, Mac, NetConfig};
use std::net::Ipv4Addr;

pub struct ArpProto;

impl NeighborProto for ArpProto {
    type Key = Ipv4Addr;
    const NAME: &'static str = "arp";

    fn iface_enabled(iface: &Iface) -> bool {
        iface.arp_enabled()
    }

    fn in_subnet(iface: &Iface, key: &Ipv4Addr) -> bool {
        iface.ipv4_in_subnet(key)
    }

    fn build_probe(iface: &Iface, key: &Ipv4Addr) -> BytesMut {
        let spa = iface.ipv4.unwrap_or(Ipv4Addr::UNSPECIFIED);
        wire::build_arp(
            Mac::BROADCAST,
            iface.mac,
            &Arp {
                op: wire::ARP_OP_REQUEST,
                sha: iface.mac,
                spa,
                tha: Mac::ZERO,
                tpa: *key,
            },
        )
    }
}

pub type ArpCache = NeighborCache<ArpProto>;

/// Handle a received ARP frame: learn the sender's mapping when it is
/// on-link, and answer requests that target the interface's address.
/// Returns the reply frame to transmit, if one is owed.
pub fn process_arp(
    cache: &mut ArpCache,
    net: &NetConfig,
    side: IfaceSide,
    now: u64,
    frame: &[u8],
) -> Option<BytesMut> {
    let iface = net.iface(side);
    let arp = wire::parse_arp(frame).ok()?;

    if !arp.spa.is_unspecified() && iface.ipv4_in_subnet(&arp.spa) {
        cache.learn(now, side, arp.spa, arp.sha);
    }

    if arp.op == wire::ARP_OP_REQUEST && iface.ipv4 == Some(arp.tpa) {
        return Some(wire::build_arp(
            arp.sha,
            iface.mac,
            &Arp {
                op: wire::ARP_OP_REPLY,
                sha: iface.mac,
                spa: arp.tpa,
                tha: arp.sha,
                tpa: arp.spa,
            },
        ));
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cache::RecordState;
    use net::IfaceConfig;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn net() -> NetConfig {
        let front = Iface::new(IfaceConfig {
            name: "front".to_string(),
            mac: Mac([2, 0, 0, 0, 0, 1]),
            ipv4: Some("10.0.0.1".parse().unwrap()),
            ipv4_prefix: 24,
            ipv6: None,
            ipv6_prefix: 64,
            arp_cache_timeout: Duration::from_secs(30),
            nd_cache_timeout: Duration::from_secs(30),
        });
        let back = Iface::new(IfaceConfig {
            name: "back".to_string(),
            mac: Mac([2, 0, 0, 0, 0, 2]),
            ipv4: Some("172.16.0.1".parse().unwrap()),
            ipv4_prefix: 24,
            ipv6: None,
            ipv6_prefix: 64,
            arp_cache_timeout: Duration::from_secs(30),
            nd_cache_timeout: Duration::from_secs(30),
        });
        NetConfig::new(front, back)
    }

    #[test]
    fn test_request_for_us_is_answered_and_learned() {
        let net = net();
        let mut cache = ArpCache::new(1_000, 1_000);
        let sender = Mac([2, 0, 0, 0, 0, 9]);

        let request = wire::build_arp(
            Mac::BROADCAST,
            sender,
            &Arp {
                op: wire::ARP_OP_REQUEST,
                sha: sender,
                spa: "10.0.0.9".parse().unwrap(),
                tha: Mac::ZERO,
                tpa: "10.0.0.1".parse().unwrap(),
            },
        );

        let reply = process_arp(&mut cache, &net, IfaceSide::Front, 5, &request)
            .expect("a reply is owed");
        let reply = wire::parse_arp(&reply).unwrap();
        assert_eq!(reply.op, wire::ARP_OP_REPLY);
        assert_eq!(reply.sha, net.front.mac);
        assert_eq!(reply.spa, "10.0.0.1".parse::<Ipv4Addr>().unwrap());
        assert_eq!(reply.tha, sender);
        assert_eq!(reply.tpa, "10.0.0.9".parse::<Ipv4Addr>().unwrap());

        let record = cache.get(&"10.0.0.9".parse().unwrap()).unwrap();
        assert_eq!(record.mac, Some(sender));
        assert_eq!(record.state, RecordState::Resolved);
    }

    #[test]
    fn test_request_for_other_host_learns_only() {
        let net = net();
        let mut cache = ArpCache::new(1_000, 1_000);
        let sender = Mac([2, 0, 0, 0, 0, 9]);

        let request = wire::build_arp(
            Mac::BROADCAST,
            sender,
            &Arp {
                op: wire::ARP_OP_REQUEST,
                sha: sender,
                spa: "10.0.0.9".parse().unwrap(),
                tha: Mac::ZERO,
                tpa: "10.0.0.77".parse().unwrap(),
            },
        );

        assert!(process_arp(&mut cache, &net, IfaceSide::Front, 5, &request).is_none());
        assert!(cache.get(&"10.0.0.9".parse().unwrap()).is_some());
    }

    #[test]
    fn test_off_link_sender_is_not_learned() {
        let net = net();
        let mut cache = ArpCache::new(1_000, 1_000);
        let sender = Mac([2, 0, 0, 0, 0, 9]);

        let reply = wire::build_arp(
            net.front.mac,
            sender,
            &Arp {
                op: wire::ARP_OP_REPLY,
                sha: sender,
                spa: "192.168.50.9".parse().unwrap(),
                tha: net.front.mac,
                tpa: "10.0.0.1".parse().unwrap(),
            },
        );

        assert!(process_arp(&mut cache, &net, IfaceSide::Front, 5, &reply).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_probe_format() {
        let net = net();
        let probe = ArpProto::build_probe(&net.front, &"10.0.0.254".parse().unwrap());
        let arp = wire::parse_arp(&probe).unwrap();
        assert_eq!(arp.op, wire::ARP_OP_REQUEST);
        assert_eq!(arp.spa, "10.0.0.1".parse::<Ipv4Addr>().unwrap());
        assert_eq!(arp.tpa, "10.0.0.254".parse::<Ipv4Addr>().unwrap());
        assert!(wire::ether_dst(&probe).is_broadcast());
    }
}
