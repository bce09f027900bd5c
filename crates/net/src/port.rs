use crate::{wire, Packet};
use std::collections::VecDeque;
use std::sync::Mutex;

pub type QueueId = u16;

/// Poll-mode packet I/O on one interface. Both operations are
/// non-blocking; workers call them from busy-poll loops.
///
/// Implementations map to a NIC port with its RX/TX queue pairs. The
/// in-memory `LoopbackPort` stands in for tests and bench mode.
pub trait PollPort: Send + Sync {
    /// Receive up to `max` frames from `queue` into `into`.
    /// Returns the number received.
    fn rx_burst(&self, queue: QueueId, into: &mut Vec<Packet>, max: usize) -> usize;

    /// Transmit a prefix of `batch` on `queue`, draining the accepted
    /// frames from the front of it. Returns the number accepted; the
    /// refused tail is left in `batch` for the caller to free.
    fn tx_burst(&self, queue: QueueId, batch: &mut Vec<Packet>) -> usize;
}

/// An in-memory port: frames injected into an RX queue are returned by
/// `rx_burst`, and transmitted frames land in a per-queue sink. The RSS
/// hash a NIC would compute is attached on inject.
pub struct LoopbackPort {
    rx: Vec<Mutex<VecDeque<Packet>>>,
    tx: Vec<Mutex<Vec<Packet>>>,
    tx_capacity: usize,
}

impl LoopbackPort {
    pub fn new(rx_queues: usize, tx_queues: usize) -> Self {
        Self {
            rx: (0..rx_queues).map(|_| Mutex::new(VecDeque::new())).collect(),
            tx: (0..tx_queues).map(|_| Mutex::new(Vec::new())).collect(),
            tx_capacity: usize::MAX,
        }
    }

    /// Cap the number of frames a single `tx_burst` accepts, to exercise
    /// the refused-tail path.
    pub fn with_tx_capacity(mut self, cap: usize) -> Self {
        self.tx_capacity = cap;
        self
    }

    /// Deliver a frame into an RX queue, attaching the RSS hash the NIC
    /// would compute for it (zero for frames that don't parse as IP).
    pub fn inject(&self, queue: QueueId, mut packet: Packet) {
        packet.rss_hash = wire::extract_packet_info(packet.as_slice())
            .map(|info| info.flow.rss_hash())
            .unwrap_or(0);
        self.rx[queue as usize].lock().unwrap().push_back(packet);
    }

    /// Take everything transmitted on a TX queue so far.
    pub fn drain_tx(&self, queue: QueueId) -> Vec<Packet> {
        std::mem::take(&mut *self.tx[queue as usize].lock().unwrap())
    }
}

impl PollPort for LoopbackPort {
    fn rx_burst(&self, queue: QueueId, into: &mut Vec<Packet>, max: usize) -> usize {
        let mut rx = self.rx[queue as usize].lock().unwrap();
        let mut count = 0;
        while count < max {
            match rx.pop_front() {
                Some(packet) => {
                    into.push(packet);
                    count += 1;
                }
                None => break,
            }
        }
        count
    }

    fn tx_burst(&self, queue: QueueId, batch: &mut Vec<Packet>) -> usize {
        let mut tx = self.tx[queue as usize].lock().unwrap();
        let accept = batch.len().min(self.tx_capacity);
        tx.extend(batch.drain(..accept));
        accept
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_rx_inject_and_burst() {
        let port = LoopbackPort::new(2, 1);
        for i in 0..5u8 {
            port.inject(0, Packet::from_slice(&[i; 20]));
        }

        let mut bufs = Vec::new();
        assert_eq!(port.rx_burst(0, &mut bufs, 3), 3);
        assert_eq!(port.rx_burst(0, &mut bufs, 3), 2);
        assert_eq!(port.rx_burst(0, &mut bufs, 3), 0);
        assert_eq!(port.rx_burst(1, &mut bufs, 3), 0);
        assert_eq!(bufs.len(), 5);
    }

    #[test]
    fn test_tx_refused_tail_stays() {
        let port = LoopbackPort::new(1, 1).with_tx_capacity(2);
        let mut batch: Vec<_> = (0..4u8).map(|i| Packet::from_slice(&[i; 20])).collect();

        assert_eq!(port.tx_burst(0, &mut batch), 2);
        // The refused tail is left for the caller to free.
        assert_eq!(batch.len(), 2);
        assert_eq!(port.drain_tx(0).len(), 2);
    }
}
