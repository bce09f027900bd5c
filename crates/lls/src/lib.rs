//! Link-Layer Support: the neighbor-discovery resolver block.
//!
//! One worker core answers ARP (IPv4) and ND (IPv6) on both interfaces,
//! keeps per-interface neighbor caches with timeouts, and serves
//! asynchronous hold/put/submit requests from other blocks through a
//! bounded mailbox. Only the LLS worker mutates cache state.

mod cache;
pub use cache::{NeighborCache, NeighborProto, Record, RecordState};

pub mod arp;
pub mod nd;

mod api;
pub use api::{ArpCallback, LlsHandle, LlsRequest, NdCallback};

mod worker;
pub use worker::{LlsCtx, LlsQueues, LlsWorker};

use net::wire::{self, Ipacket};
use net::{FlowKey, Iface};

/// Seconds between scans of each neighbor cache.
pub const CACHE_SCAN_INTERVAL_SEC: u64 = 10;

/// Requests drained from the LLS mailbox per loop iteration.
pub const LLS_REQ_BURST_SIZE: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0} service is not enabled on either interface")]
    ServiceDisabled(&'static str),
    #[error("LLS request mailbox rejected the request: {0}")]
    Mailbox(#[from] mailbox::SendError),
}

/// Whether a frame is a neighbor-discovery message addressed to `iface`:
/// IPv6, ICMPv6, a neighbor solicit or advert, and destined to one of the
/// interface's unicast addresses or solicited-node multicast groups.
pub fn pkt_is_nd(frame: &[u8], info: &Ipacket, iface: &Iface) -> bool {
    if frame.len() < wire::ND_NEIGH_PKT_MIN_LEN || info.next_proto != wire::IPPROTO_ICMPV6 {
        return false;
    }
    let FlowKey::V6 { dst, .. } = info.flow else {
        return false;
    };
    let icmp_type = frame[info.l3 + wire::IPV6_HDR_LEN];
    (icmp_type == wire::ND_NEIGHBOR_SOLICIT || icmp_type == wire::ND_NEIGHBOR_ADVERT)
        && iface.nd_destination(&dst)
}

#[cfg(test)]
mod test {
    use super::*;
    use net::wire::{build_neighbor_solicit, extract_packet_info};
    use net::{IfaceConfig, Mac};
    use std::time::Duration;

    fn iface() -> Iface {
        Iface::new(IfaceConfig {
            name: "front".to_string(),
            mac: Mac([2, 0, 0, 0, 0, 1]),
            ipv4: None,
            ipv4_prefix: 24,
            ipv6: Some("2001:db8::1".parse().unwrap()),
            ipv6_prefix: 64,
            arp_cache_timeout: Duration::from_secs(30),
            nd_cache_timeout: Duration::from_secs(30),
        })
    }

    #[test]
    fn test_pkt_is_nd_solicited_node() {
        let iface = iface();
        let frame = build_neighbor_solicit(
            Mac([2, 0, 0, 0, 0, 9]),
            &"fe80::9".parse().unwrap(),
            &iface.ipv6.unwrap(),
        );
        let info = extract_packet_info(&frame).unwrap();
        assert!(pkt_is_nd(&frame, &info, &iface));
    }

    #[test]
    fn test_pkt_is_nd_rejects_other_destinations() {
        let iface = iface();
        // A solicit for an address we don't own is multicast to a
        // different solicited-node group.
        let frame = build_neighbor_solicit(
            Mac([2, 0, 0, 0, 0, 9]),
            &"fe80::9".parse().unwrap(),
            &"2001:db8::4242".parse().unwrap(),
        );
        let info = extract_packet_info(&frame).unwrap();
        assert!(!pkt_is_nd(&frame, &info, &iface));
    }
}
