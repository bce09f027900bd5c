//! One GK shard: its flow table, its command mailbox, and the busy-poll
//! loop tying RX classification, the state machine, TX, and command
//! processing together on a single core.

use crate::config::GkShared;
use crate::{apply_policy, process_packet, Disposition, FlowEntry, FlowTable, GkCmd};
use lls::pkt_is_nd;
use mailbox::{Mailbox, MailboxSender, MAILBOX_MAX_ENTRIES};
use net::wire;
use net::{IfaceSide, Packet, QueueId};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// RX/TX burst ceiling per loop iteration.
pub const MAX_PKT_BURST: usize = 32;

/// Commands drained from the shard mailbox per loop iteration.
pub const GK_CMD_BURST_SIZE: usize = 32;

pub struct GkInstance {
    pub rx_queue_front: QueueId,
    pub tx_queue_back: QueueId,
    table: FlowTable,
    mailbox: Mailbox<GkCmd>,
    rx_bufs: Vec<Packet>,
    tx_bufs: Vec<Packet>,
    cmd_bufs: Vec<GkCmd>,
}

impl GkInstance {
    /// Build a shard with its own flow table and mailbox. The returned
    /// sender is what the shard router hands to policy producers.
    pub fn new(
        flow_ht_size: usize,
        rx_queue_front: QueueId,
        tx_queue_back: QueueId,
    ) -> (Self, MailboxSender<GkCmd>) {
        let (tx, rx) = mailbox::bounded(MAILBOX_MAX_ENTRIES);
        let instance = Self {
            rx_queue_front,
            tx_queue_back,
            table: FlowTable::with_capacity(flow_ht_size),
            mailbox: rx,
            rx_bufs: Vec::with_capacity(MAX_PKT_BURST),
            tx_bufs: Vec::with_capacity(MAX_PKT_BURST),
            cmd_bufs: Vec::with_capacity(GK_CMD_BURST_SIZE),
        };
        (instance, tx)
    }

    /// One loop iteration. An empty RX burst short-circuits the whole
    /// iteration, commands included; the mailbox is drained only on
    /// iterations that carried traffic.
    pub fn poll(&mut self, shared: &GkShared) {
        self.rx_bufs.clear();
        let num_rx =
            shared
                .front
                .rx_burst(self.rx_queue_front, &mut self.rx_bufs, MAX_PKT_BURST);
        if num_rx == 0 {
            return;
        }

        for mut packet in self.rx_bufs.drain(..) {
            let Ok(info) = wire::extract_packet_info(packet.as_slice()) else {
                // Drop non-IP traffic, silently: this is the hot path.
                continue;
            };

            if pkt_is_nd(packet.as_slice(), &info, &shared.net.front) {
                // Neighbor discovery belongs to the LLS block. A failed
                // hand-off consumed (dropped) the frame already.
                let _ = shared.lls.submit_nd(packet, IfaceSide::Front);
                continue;
            }

            // One clock read serves entry creation and the state machine.
            let now = shared.clock.now();

            let idx = match self.table.lookup(&info.flow, packet.rss_hash) {
                Some(idx) => idx,
                None => {
                    match self
                        .table
                        .insert(FlowEntry::initialize(info.flow, now), packet.rss_hash)
                    {
                        Ok(idx) => idx,
                        // A full table is a silent drop path.
                        Err(_) => continue,
                    }
                }
            };

            let entry = self.table.entry_mut(idx);
            match process_packet(entry, &mut packet, info.l3, now, &shared.clock, &shared.tunnel)
            {
                Disposition::Forward { .. } => self.tx_bufs.push(packet),
                Disposition::Drop => {}
            }
        }

        let num_tx = self.tx_bufs.len();
        let num_tx_succ = shared.back.tx_burst(self.tx_queue_back, &mut self.tx_bufs);
        if num_tx_succ < num_tx {
            // Free whatever the NIC refused; there is no retry.
            self.tx_bufs.clear();
        }

        self.cmd_bufs.clear();
        let num_cmd = self.mailbox.dequeue_burst(&mut self.cmd_bufs, GK_CMD_BURST_SIZE);
        if num_cmd > 0 {
            let now = shared.clock.now();
            for cmd in self.cmd_bufs.drain(..) {
                match cmd {
                    GkCmd::AddPolicy(policy) => {
                        apply_policy(&mut self.table, &shared.clock, now, policy)
                    }
                }
            }
        }
    }

    /// Run until the process-wide exiting flag flips. The shard holds its
    /// reference to the shared configuration for the whole run; the last
    /// worker out releases it.
    pub fn run(mut self, shared: Arc<GkShared>) {
        tracing::info!(
            rx_queue = self.rx_queue_front,
            "gk: the GK block is running"
        );
        while !shared.exiting.load(Ordering::Acquire) {
            self.poll(&shared);
        }
        tracing::info!(
            rx_queue = self.rx_queue_front,
            "gk: the GK block is exiting"
        );
    }
}
