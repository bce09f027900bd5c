use std::net::{Ipv4Addr, Ipv6Addr};

/// The 40-byte Toeplitz key used for RSS hashing, identical on the NIC and
/// in software so that a flow hashed here lands on the same RX queue the
/// NIC would pick. This is the standard Microsoft verification-suite key.
pub const RSS_KEY: [u8; 40] = [
    0x6d, 0x5a, 0x56, 0xda, 0x25, 0x5b, 0x0e, 0xc2, 0x41, 0x67, 0x25, 0x3d, 0x43, 0xa3, 0x8f,
    0xb0, 0xd0, 0xca, 0x2b, 0xcb, 0xae, 0x7b, 0x30, 0xb4, 0x77, 0xcb, 0x2d, 0xa3, 0x80, 0x30,
    0xf2, 0x0c, 0x6a, 0x42, 0xb7, 0x3b, 0xbe, 0xac, 0x01, 0xfa,
];

/// FlowKey identifies a conversation crossing the dataplane: address
/// family, source address, destination address, and the upper-layer
/// protocol (the IPv4 protocol / IPv6 next-header byte). Two keys are
/// equal iff their canonical byte layouts are equal, and equal keys
/// produce equal RSS hashes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FlowKey {
    V4 {
        src: Ipv4Addr,
        dst: Ipv4Addr,
        proto: u8,
    },
    V6 {
        src: Ipv6Addr,
        dst: Ipv6Addr,
        proto: u8,
    },
}

impl FlowKey {
    /// EtherType of the key's address family.
    pub fn ether_type(&self) -> u16 {
        match self {
            FlowKey::V4 { .. } => crate::wire::ETHERTYPE_IPV4,
            FlowKey::V6 { .. } => crate::wire::ETHERTYPE_IPV6,
        }
    }

    /// The upper-layer protocol tag.
    pub fn proto(&self) -> u8 {
        match self {
            FlowKey::V4 { proto, .. } | FlowKey::V6 { proto, .. } => *proto,
        }
    }

    /// Toeplitz hash over the source and destination addresses, matching
    /// the hash the NIC computes for RX queue dispatch. The protocol tag
    /// is not hashed: the NIC's L3 hash covers addresses only, so keys
    /// differing just in protocol land on the same shard.
    pub fn rss_hash(&self) -> u32 {
        match self {
            FlowKey::V4 { src, dst, .. } => {
                let mut data = [0u8; 8];
                data[..4].copy_from_slice(&src.octets());
                data[4..].copy_from_slice(&dst.octets());
                toeplitz_hash(&RSS_KEY, &data)
            }
            FlowKey::V6 { src, dst, .. } => {
                let mut data = [0u8; 32];
                data[..16].copy_from_slice(&src.octets());
                data[16..].copy_from_slice(&dst.octets());
                toeplitz_hash(&RSS_KEY, &data)
            }
        }
    }
}

impl std::fmt::Display for FlowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowKey::V4 { src, dst, proto } => write!(f, "{src} -> {dst}/{proto}"),
            FlowKey::V6 { src, dst, proto } => write!(f, "{src} -> {dst}/{proto}"),
        }
    }
}

/// Toeplitz hash of `data` under `key`, processing bits most-significant
/// first. `key` must be long enough that every data bit has a full 32-bit
/// window (len(key) >= len(data) + 4).
pub fn toeplitz_hash(key: &[u8], data: &[u8]) -> u32 {
    assert!(key.len() >= data.len() + 4);

    let mut hash = 0u32;
    for (i, &byte) in data.iter().enumerate() {
        // 64-bit window over key bytes [i, i+8); the 32-bit windows for
        // each of this byte's bits are slices of it.
        let mut window = 0u64;
        for k in 0..8 {
            window = (window << 8) | *key.get(i + k).unwrap_or(&0) as u64;
        }
        for bit in 0..8 {
            if byte & (0x80 >> bit) != 0 {
                hash ^= (window >> (32 - bit)) as u32;
            }
        }
    }
    hash
}

#[cfg(test)]
mod test {
    use super::*;

    // Expected values are from the Microsoft RSS verification suite
    // (also carried in DPDK's thash tests).
    #[test]
    fn test_toeplitz_ipv4_vectors() {
        let cases: [(Ipv4Addr, Ipv4Addr, u32); 5] = [
            ("66.9.149.187".parse().unwrap(), "161.142.100.80".parse().unwrap(), 0x323e8fc2),
            ("199.92.111.2".parse().unwrap(), "65.69.140.83".parse().unwrap(), 0xd718262a),
            ("24.19.198.95".parse().unwrap(), "12.22.207.184".parse().unwrap(), 0xd2d0a5de),
            ("38.27.205.30".parse().unwrap(), "209.142.163.6".parse().unwrap(), 0x82989176),
            ("153.39.163.191".parse().unwrap(), "202.188.127.2".parse().unwrap(), 0x5d1809c5),
        ];
        for (src, dst, expect) in cases {
            let key = FlowKey::V4 { src, dst, proto: 6 };
            assert_eq!(key.rss_hash(), expect, "{src} -> {dst}");
        }
    }

    #[test]
    fn test_toeplitz_ipv6_vectors() {
        let cases: [(Ipv6Addr, Ipv6Addr, u32); 3] = [
            (
                "3ffe:2501:200:1fff::7".parse().unwrap(),
                "3ffe:2501:200:3::1".parse().unwrap(),
                0x2cc18cd5,
            ),
            (
                "3ffe:501:8::260:97ff:fe40:efab".parse().unwrap(),
                "ff02::1".parse().unwrap(),
                0x0f0c461c,
            ),
            (
                "3ffe:1900:4545:3:200:f8ff:fe21:67cf".parse().unwrap(),
                "fe80::200:f8ff:fe21:67cf".parse().unwrap(),
                0x4b61e985,
            ),
        ];
        for (src, dst, expect) in cases {
            let key = FlowKey::V6 { src, dst, proto: 6 };
            assert_eq!(key.rss_hash(), expect, "{src} -> {dst}");
        }
    }

    #[test]
    fn test_equal_keys_hash_identically() {
        let a = FlowKey::V4 {
            src: "10.0.0.1".parse().unwrap(),
            dst: "10.0.0.2".parse().unwrap(),
            proto: 17,
        };
        let b = a;
        assert_eq!(a, b);
        assert_eq!(a.rss_hash(), b.rss_hash());

        // Direction matters: the reversed pair is a different flow.
        let c = FlowKey::V4 {
            src: "10.0.0.2".parse().unwrap(),
            dst: "10.0.0.1".parse().unwrap(),
            proto: 17,
        };
        assert_ne!(a, c);
    }

    #[test]
    fn test_proto_distinguishes_flows_on_one_shard() {
        // TCP and UDP between the same addresses are different flows with
        // their own admission state, but the NIC's address-only hash
        // keeps them on the same shard.
        let tcp = FlowKey::V4 {
            src: "10.0.0.1".parse().unwrap(),
            dst: "10.0.0.2".parse().unwrap(),
            proto: 6,
        };
        let udp = FlowKey::V4 {
            src: "10.0.0.1".parse().unwrap(),
            dst: "10.0.0.2".parse().unwrap(),
            proto: 17,
        };
        assert_ne!(tcp, udp);
        assert_eq!(tcp.rss_hash(), udp.rss_hash());
        assert_eq!(tcp.proto(), 6);
    }
}
