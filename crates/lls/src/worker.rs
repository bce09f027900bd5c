//! The LLS worker: one busy-poll loop serving both interfaces and both
//! caches. Packets first, then queued requests; the cache-scan timer
//! advances only on iterations where the request mailbox was empty, so an
//! idle loop pays for a clock read and a busy one does not.

use crate::arp::{process_arp, ArpCache};
use crate::nd::{process_nd, NdCache};
use crate::api::{LlsHandle, LlsRequest};
use crate::{pkt_is_nd, CACHE_SCAN_INTERVAL_SEC, LLS_REQ_BURST_SIZE};
use bytes::BytesMut;
use clock::Clock;
use mailbox::{Mailbox, MAILBOX_MAX_ENTRIES};
use net::wire;
use net::{IfaceSide, NetConfig, Packet, PollPort, QueueId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Largest RX burst the LLS worker takes per queue per iteration.
const MAX_PKT_BURST: usize = 32;

/// Everything the LLS worker shares with the rest of the process.
pub struct LlsCtx {
    pub net: NetConfig,
    pub clock: Arc<Clock>,
    pub front: Arc<dyn PollPort>,
    pub back: Arc<dyn PollPort>,
    pub exiting: Arc<AtomicBool>,
}

/// Queue ids assigned to the LLS worker during setup.
#[derive(Debug, Copy, Clone)]
pub struct LlsQueues {
    pub rx_front: QueueId,
    pub tx_front: QueueId,
    pub rx_back: QueueId,
    pub tx_back: QueueId,
}

pub struct LlsWorker {
    arp_cache: ArpCache,
    nd_cache: NdCache,
    requests: Mailbox<LlsRequest>,
    queues: LlsQueues,
    scan_period: u64,
    next_scan_at: u64,
    arp_enabled: bool,
    nd_enabled: bool,
    rx_bufs: Vec<Packet>,
    req_bufs: Vec<LlsRequest>,
}

impl LlsWorker {
    /// Build the worker and the request handle other blocks use to reach
    /// it. Cache timeouts come from the per-interface configuration.
    pub fn new(ctx: &LlsCtx, queues: LlsQueues) -> (Self, LlsHandle) {
        let (tx, rx) = mailbox::bounded(MAILBOX_MAX_ENTRIES);
        let handle = LlsHandle::new(tx, &ctx.net);

        let secs = |d: std::time::Duration| ctx.clock.ticks_from_secs(d.as_secs());
        let arp_cache = ArpCache::new(
            secs(ctx.net.front.arp_cache_timeout),
            secs(ctx.net.back.arp_cache_timeout),
        );
        let nd_cache = NdCache::new(
            secs(ctx.net.front.nd_cache_timeout),
            secs(ctx.net.back.nd_cache_timeout),
        );

        let scan_period = ctx.clock.ticks_from_secs(CACHE_SCAN_INTERVAL_SEC);
        let worker = Self {
            arp_cache,
            nd_cache,
            requests: rx,
            queues,
            scan_period,
            next_scan_at: ctx.clock.now() + scan_period,
            arp_enabled: ctx.net.arp_enabled(),
            nd_enabled: ctx.net.nd_enabled(),
            rx_bufs: Vec::with_capacity(MAX_PKT_BURST),
            req_bufs: Vec::with_capacity(LLS_REQ_BURST_SIZE),
        };
        (worker, handle)
    }

    fn port<'c>(ctx: &'c LlsCtx, side: IfaceSide) -> &'c dyn PollPort {
        match side {
            IfaceSide::Front => ctx.front.as_ref(),
            IfaceSide::Back => ctx.back.as_ref(),
        }
    }

    fn tx_queue(&self, side: IfaceSide) -> QueueId {
        match side {
            IfaceSide::Front => self.queues.tx_front,
            IfaceSide::Back => self.queues.tx_back,
        }
    }

    /// Transmit one locally built frame; a refused frame is freed.
    fn transmit(&self, ctx: &LlsCtx, side: IfaceSide, frame: BytesMut) {
        let mut batch = vec![Packet::new(frame)];
        Self::port(ctx, side).tx_burst(self.tx_queue(side), &mut batch);
    }

    fn process_pkts(&mut self, ctx: &LlsCtx, side: IfaceSide) {
        let rx_queue = match side {
            IfaceSide::Front => self.queues.rx_front,
            IfaceSide::Back => self.queues.rx_back,
        };

        self.rx_bufs.clear();
        let num_rx = Self::port(ctx, side).rx_burst(rx_queue, &mut self.rx_bufs, MAX_PKT_BURST);
        if num_rx == 0 {
            return;
        }
        let now = ctx.clock.now();
        let iface = ctx.net.iface(side);

        let mut replies: Vec<BytesMut> = Vec::new();
        for packet in self.rx_bufs.drain(..) {
            let frame = packet.as_slice();
            if frame.len() < wire::ETHER_HDR_LEN {
                continue;
            }
            if !iface.accepts_dst_mac(&wire::ether_dst(frame)) {
                continue;
            }

            match wire::ether_type(frame) {
                wire::ETHERTYPE_ARP => {
                    if let Some(reply) =
                        process_arp(&mut self.arp_cache, &ctx.net, side, now, frame)
                    {
                        replies.push(reply);
                    }
                }
                wire::ETHERTYPE_IPV6 if side == IfaceSide::Back => {
                    // ND arrives here directly only on the back interface;
                    // the front interface's ND is classified by GK workers
                    // and handed over through the request mailbox.
                    let Ok(info) = wire::extract_packet_info(frame) else {
                        continue;
                    };
                    if pkt_is_nd(frame, &info, iface) {
                        if let Some(advert) =
                            process_nd(&mut self.nd_cache, &ctx.net, side, now, frame)
                        {
                            replies.push(advert);
                        }
                    } else {
                        tracing::error!(
                            iface = %iface.name,
                            "non-ND IPv6 frame on the LLS queue"
                        );
                    }
                }
                other => {
                    tracing::error!(
                        iface = %iface.name,
                        ether_type = format_args!("{other:#06x}"),
                        "unexpected EtherType on LLS queue"
                    );
                }
            }
        }

        for reply in replies {
            self.transmit(ctx, side, reply);
        }
    }

    fn handle_request(&mut self, ctx: &LlsCtx, now: u64, request: LlsRequest) {
        match request {
            LlsRequest::HoldArp { ip, cb, lcore } => {
                if let Some((side, probe)) = self.arp_cache.hold(&ctx.net, now, ip, cb, lcore) {
                    self.transmit(ctx, side, probe);
                }
            }
            LlsRequest::PutArp { ip, lcore } => self.arp_cache.put(&ip, lcore),
            LlsRequest::HoldNd { ip, cb, lcore } => {
                if let Some((side, probe)) = self.nd_cache.hold(&ctx.net, now, ip, cb, lcore) {
                    self.transmit(ctx, side, probe);
                }
            }
            LlsRequest::PutNd { ip, lcore } => self.nd_cache.put(&ip, lcore),
            LlsRequest::Nd { packet, iface } => {
                if let Some(advert) =
                    process_nd(&mut self.nd_cache, &ctx.net, iface, now, packet.as_slice())
                {
                    self.transmit(ctx, iface, advert);
                }
            }
        }
    }

    fn scan(&mut self, ctx: &LlsCtx, now: u64) {
        if self.arp_enabled {
            for (side, probe) in self.arp_cache.scan(now, &ctx.net) {
                self.transmit(ctx, side, probe);
            }
        }
        if self.nd_enabled {
            for (side, probe) in self.nd_cache.scan(now, &ctx.net) {
                self.transmit(ctx, side, probe);
            }
        }
        if tracing::enabled!(tracing::Level::DEBUG) {
            self.arp_cache.dump();
            self.nd_cache.dump();
        }
    }

    /// One loop iteration: packets on both interfaces, then queued
    /// requests, then (only if the mailbox was idle) the scan timer.
    pub fn poll(&mut self, ctx: &LlsCtx) {
        self.process_pkts(ctx, IfaceSide::Front);
        if ctx.net.back_enabled {
            self.process_pkts(ctx, IfaceSide::Back);
        }

        self.req_bufs.clear();
        let drained = self
            .requests
            .dequeue_burst(&mut self.req_bufs, LLS_REQ_BURST_SIZE);
        if drained > 0 {
            let now = ctx.clock.now();
            for request in std::mem::take(&mut self.req_bufs) {
                self.handle_request(ctx, now, request);
            }
        } else {
            let now = ctx.clock.now();
            if now >= self.next_scan_at {
                self.scan(ctx, now);
                self.next_scan_at = now + self.scan_period;
            }
        }
    }

    /// Run until the process-wide exiting flag flips.
    pub fn run(mut self, ctx: LlsCtx) {
        tracing::info!("lls: the LLS block is running");
        while !ctx.exiting.load(Ordering::Acquire) {
            self.poll(&ctx);
        }
        tracing::info!("lls: the LLS block is exiting");
    }

    #[cfg(test)]
    pub(crate) fn caches(&self) -> (&ArpCache, &NdCache) {
        (&self.arp_cache, &self.nd_cache)
    }
}
