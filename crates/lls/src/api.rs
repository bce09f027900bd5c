//! The request side of LLS: non-blocking entry points usable from any
//! worker core. Each call serializes a request onto the LLS mailbox; the
//! LLS worker applies it to the caches on its own core.

use crate::cache::Callback;
use crate::Error;
use mailbox::MailboxSender;
use net::{IfaceSide, NetConfig, Packet};
use std::net::{Ipv4Addr, Ipv6Addr};

pub type ArpCallback = Callback<Ipv4Addr>;
pub type NdCallback = Callback<Ipv6Addr>;

pub enum LlsRequest {
    HoldArp {
        ip: Ipv4Addr,
        cb: ArpCallback,
        lcore: u32,
    },
    PutArp {
        ip: Ipv4Addr,
        lcore: u32,
    },
    HoldNd {
        ip: Ipv6Addr,
        cb: NdCallback,
        lcore: u32,
    },
    PutNd {
        ip: Ipv6Addr,
        lcore: u32,
    },
    /// A neighbor-discovery frame received by another block (GK sees
    /// front-interface ND in its RX path), handed off for processing.
    Nd {
        packet: Packet,
        iface: IfaceSide,
    },
}

/// Cloneable handle to the LLS worker, held by every block that needs L2
/// resolution or receives ND traffic.
#[derive(Clone)]
pub struct LlsHandle {
    requests: MailboxSender<LlsRequest>,
    arp_enabled: bool,
    nd_enabled: bool,
}

impl LlsHandle {
    pub(crate) fn new(requests: MailboxSender<LlsRequest>, net: &NetConfig) -> Self {
        Self {
            requests,
            arp_enabled: net.arp_enabled(),
            nd_enabled: net.nd_enabled(),
        }
    }

    /// Ask to be told `ip`'s MAC, now if resolved or whenever it resolves.
    /// The callback runs on the LLS core and must not block.
    pub fn hold_arp(&self, cb: ArpCallback, ip: Ipv4Addr, lcore: u32) -> Result<(), Error> {
        if !self.arp_enabled {
            tracing::warn!(lcore, "hold_arp called but ARP service is not enabled");
            return Err(Error::ServiceDisabled("ARP"));
        }
        Ok(self.requests.send(LlsRequest::HoldArp { ip, cb, lcore })?)
    }

    /// Release a prior hold from `lcore`.
    pub fn put_arp(&self, ip: Ipv4Addr, lcore: u32) -> Result<(), Error> {
        if !self.arp_enabled {
            tracing::warn!(lcore, "put_arp called but ARP service is not enabled");
            return Err(Error::ServiceDisabled("ARP"));
        }
        Ok(self.requests.send(LlsRequest::PutArp { ip, lcore })?)
    }

    pub fn hold_nd(&self, cb: NdCallback, ip: Ipv6Addr, lcore: u32) -> Result<(), Error> {
        if !self.nd_enabled {
            tracing::warn!(lcore, "hold_nd called but ND service is not enabled");
            return Err(Error::ServiceDisabled("ND"));
        }
        Ok(self.requests.send(LlsRequest::HoldNd { ip, cb, lcore })?)
    }

    pub fn put_nd(&self, ip: Ipv6Addr, lcore: u32) -> Result<(), Error> {
        if !self.nd_enabled {
            tracing::warn!(lcore, "put_nd called but ND service is not enabled");
            return Err(Error::ServiceDisabled("ND"));
        }
        Ok(self.requests.send(LlsRequest::PutNd { ip, lcore })?)
    }

    /// Hand a received ND frame to the LLS worker. On failure the frame is
    /// consumed (dropped), matching the caller's only recourse.
    pub fn submit_nd(&self, packet: Packet, iface: IfaceSide) -> Result<(), Error> {
        if !self.nd_enabled {
            tracing::warn!("submit_nd called but ND service is not enabled");
            return Err(Error::ServiceDisabled("ND"));
        }
        Ok(self.requests.send(LlsRequest::Nd { packet, iface })?)
    }
}
