use crate::port::QueueId;

/// Size of the RSS redirection table. The shard-routing contract assumes
/// exactly 128 entries; NICs with a different reta size are rejected at
/// setup.
pub const RETA_SIZE: usize = 128;

/// The NIC's RSS redirection table: hash bucket -> RX queue id. Queried
/// once at setup and then read-only, so the decision service and the GK
/// workers agree on which shard owns any given flow.
#[derive(Debug, Clone)]
pub struct RssConf {
    reta: [QueueId; RETA_SIZE],
}

impl RssConf {
    /// Distribute the redirection table round-robin over `queues`, the way
    /// a NIC initializes its reta for a queue set.
    pub fn balanced(queues: &[QueueId]) -> Self {
        assert!(!queues.is_empty(), "RSS requires at least one RX queue");
        let mut reta = [0; RETA_SIZE];
        for (i, slot) in reta.iter_mut().enumerate() {
            *slot = queues[i % queues.len()];
        }
        Self { reta }
    }

    /// RX queue the NIC dispatches a frame with this RSS hash to.
    pub fn queue_for_hash(&self, hash: u32) -> QueueId {
        self.reta[(hash as usize) & (RETA_SIZE - 1)]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_balanced_reta_covers_queues() {
        let conf = RssConf::balanced(&[3, 7, 9]);
        let mut seen = std::collections::HashSet::new();
        for hash in 0..RETA_SIZE as u32 {
            seen.insert(conf.queue_for_hash(hash));
        }
        assert_eq!(seen, [3, 7, 9].into_iter().collect());

        // Only the low 7 bits of the hash select a bucket.
        assert_eq!(conf.queue_for_hash(5), conf.queue_for_hash(5 + 128));
    }
}
