//! The per-flow admission state machine.
//!
//! A flow is in one of three states. Request flows carry a priority that
//! grows with the logarithm of their inter-arrival idle time; the grantor
//! admits the most patient sources first. Granted flows spend a byte
//! budget that renews once per second and periodically re-request their
//! capability. Declined flows drop everything until the punishment
//! expires.

use clock::Clock;
use net::{encapsulate, FlowKey, Packet, TunnelInfo};

pub const START_PRIORITY: u8 = 38;
/// Twice the size of a large DNS reply, in packets.
pub const START_ALLOWANCE: u8 = 8;

/// DSCP values of encapsulated packets: 0 is legacy traffic (never
/// produced here), 1 granted, 2 granted with a capability-renewal marker,
/// 3..=63 request with escalating priority.
pub const PRIORITY_GRANTED: u8 = 1;
pub const PRIORITY_RENEW_CAP: u8 = 2;
pub const PRIORITY_MAX: u8 = 63;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowEntry {
    pub flow: FlowKey,
    pub state: FlowState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowState {
    Request(Request),
    Granted(Granted),
    Declined(Declined),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Tick the flow's previous packet was seen at.
    pub last_packet_seen_at: u64,
    /// Priority carried by that packet, 0..=63.
    pub last_priority: u8,
    /// Packets the flow may still send at `last_priority` without having
    /// waited long enough to earn it again.
    pub allowance: u8,
    /// TODO the grantor should come from an LPM lookup of the destination.
    pub grantor_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Granted {
    /// When the granted capability expires.
    pub cap_expire_at: u64,
    /// When `budget_byte` next resets.
    pub budget_renew_at: u64,
    /// KiB the flow may send per renewal window.
    pub tx_rate_kb_cycle: u32,
    /// Bytes the flow may still send in the current window.
    pub budget_byte: i64,
    /// TODO the grantor should come from an LPM lookup of the destination.
    pub grantor_id: u32,
    /// When the next capability renewal is owed to the grantor.
    pub send_next_renewal_at: u64,
    /// Ticks between capability renewals.
    pub renewal_step_cycle: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declined {
    /// When the punishment expires.
    pub expire_at: u64,
}

impl FlowEntry {
    /// A fresh entry for the first packet of an unseen flow.
    pub fn initialize(flow: FlowKey, now: u64) -> Self {
        Self {
            flow,
            state: request_state(now),
        }
    }

    /// Reset to Request with a full payload, forgetting the prior state.
    pub fn reinitialize(&mut self, now: u64) {
        self.state = request_state(now);
    }
}

fn request_state(now: u64) -> FlowState {
    FlowState::Request(Request {
        last_packet_seen_at: now,
        last_priority: START_PRIORITY,
        allowance: START_ALLOWANCE - 1,
        grantor_id: 0,
    })
}

/// Map the idle time between two packets to a priority: the bit index of
/// the most significant set bit of the elapsed picoseconds. Longer waits
/// earn exponentially higher priorities, saturating at 63.
pub fn priority_from_delta_time(picosec_per_tick: u64, present: u64, past: u64) -> u8 {
    if present < past {
        // Should never happen; keep going rather than abort.
        tracing::error!("gk: the present time is smaller than the past time");
        return 0;
    }

    let delta_picos = (present - past).saturating_mul(picosec_per_tick);
    if delta_picos < 1 {
        return 0;
    }
    (63 - delta_picos.leading_zeros()) as u8
}

/// What the state machine decided for one packet.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Disposition {
    Forward { dscp: u8 },
    Drop,
}

/// Run one packet of `entry`'s flow through the state machine,
/// encapsulating it in place when it is to be forwarded.
pub fn process_packet(
    entry: &mut FlowEntry,
    packet: &mut Packet,
    l3: usize,
    now: u64,
    clock: &Clock,
    tunnel: &TunnelInfo,
) -> Disposition {
    match &entry.state {
        FlowState::Request(_) => process_request(entry, packet, l3, now, clock, tunnel),
        FlowState::Granted(_) => process_granted(entry, packet, l3, now, clock, tunnel),
        FlowState::Declined(_) => process_declined(entry, packet, l3, now, clock, tunnel),
    }
}

fn process_request(
    entry: &mut FlowEntry,
    packet: &mut Packet,
    l3: usize,
    now: u64,
    clock: &Clock,
    tunnel: &TunnelInfo,
) -> Disposition {
    let FlowState::Request(request) = &mut entry.state else {
        return Disposition::Drop;
    };

    let mut priority =
        priority_from_delta_time(clock.picosec_per_tick(), now, request.last_packet_seen_at);
    request.last_packet_seen_at = now;

    // Strictly "<": an equal priority means the source waited long enough
    // to earn its last priority again, so the allowance refreshes.
    if priority < request.last_priority && request.allowance > 0 {
        request.allowance -= 1;
        priority = request.last_priority;
    } else {
        request.last_priority = priority;
        request.allowance = START_ALLOWANCE - 1;
    }

    // Shift past the reserved DSCPs (0 legacy, 1 granted, 2 renewal).
    let dscp = (priority + 3).min(PRIORITY_MAX);

    match encapsulate(packet, l3, dscp, tunnel) {
        Ok(()) => Disposition::Forward { dscp },
        Err(_) => Disposition::Drop,
    }
}

fn process_granted(
    entry: &mut FlowEntry,
    packet: &mut Packet,
    l3: usize,
    now: u64,
    clock: &Clock,
    tunnel: &TunnelInfo,
) -> Disposition {
    let expired = matches!(&entry.state, FlowState::Granted(g) if now >= g.cap_expire_at);
    if expired {
        entry.reinitialize(now);
        return process_request(entry, packet, l3, now, clock, tunnel);
    }

    let FlowState::Granted(granted) = &mut entry.state else {
        return Disposition::Drop;
    };

    if now >= granted.budget_renew_at {
        granted.budget_renew_at = now + clock.ticks_per_sec();
        granted.budget_byte = granted.tx_rate_kb_cycle as i64 * 1024;
    }

    // The budget check precedes any mutation: an oversize packet is
    // dropped and the budget is left untouched.
    if packet.len() as i64 > granted.budget_byte {
        return Disposition::Drop;
    }
    granted.budget_byte -= packet.len() as i64;

    let dscp = if now >= granted.send_next_renewal_at {
        granted.send_next_renewal_at = now + granted.renewal_step_cycle;
        PRIORITY_RENEW_CAP
    } else {
        PRIORITY_GRANTED
    };

    match encapsulate(packet, l3, dscp, tunnel) {
        Ok(()) => Disposition::Forward { dscp },
        Err(_) => Disposition::Drop,
    }
}

fn process_declined(
    entry: &mut FlowEntry,
    packet: &mut Packet,
    l3: usize,
    now: u64,
    clock: &Clock,
    tunnel: &TunnelInfo,
) -> Disposition {
    let expired = matches!(&entry.state, FlowState::Declined(d) if now >= d.expire_at);
    if expired {
        entry.reinitialize(now);
        return process_request(entry, packet, l3, now, clock, tunnel);
    }
    Disposition::Drop
}
