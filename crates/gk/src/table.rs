//! The per-shard flow table: a closed-capacity hash table whose hash is
//! supplied by the caller: the NIC's RSS hash for data-plane packets, or
//! the software Toeplitz hash for policy commands (identical by contract).
//! Slot indices are stable for the life of the table; there is no
//! deletion, because entries are never evicted (the table is sized for
//! steady state and a full table is a drop path).

use crate::FlowEntry;
use net::FlowKey;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("flow table is full")]
pub struct TableFull;

struct Slot {
    hash: u32,
    entry: FlowEntry,
}

pub struct FlowTable {
    slots: Vec<Option<Slot>>,
    mask: usize,
    len: usize,
    capacity: usize,
}

impl FlowTable {
    /// Build a table holding up to `capacity` flows. The probe space is
    /// the capacity rounded up to a power of two.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "flow table capacity must be positive");
        let slots = capacity.next_power_of_two();
        Self {
            slots: std::iter::repeat_with(|| None).take(slots).collect(),
            mask: slots - 1,
            len: 0,
            capacity,
        }
    }

    /// Find the slot index of `key`, probing from its hash position.
    pub fn lookup(&self, key: &FlowKey, hash: u32) -> Option<usize> {
        let mut idx = hash as usize & self.mask;
        for _ in 0..self.slots.len() {
            match &self.slots[idx] {
                Some(slot) if slot.hash == hash && slot.entry.flow == *key => return Some(idx),
                Some(_) => idx = (idx + 1) & self.mask,
                None => return None,
            }
        }
        None
    }

    /// Insert `entry` under its key's hash, returning the stable slot
    /// index. The caller is expected to have ruled out a prior mapping
    /// with `lookup`.
    pub fn insert(&mut self, entry: FlowEntry, hash: u32) -> Result<usize, TableFull> {
        if self.len >= self.capacity {
            return Err(TableFull);
        }
        let mut idx = hash as usize & self.mask;
        while self.slots[idx].is_some() {
            idx = (idx + 1) & self.mask;
        }
        self.slots[idx] = Some(Slot { hash, entry });
        self.len += 1;
        Ok(idx)
    }

    pub fn entry(&self, idx: usize) -> &FlowEntry {
        match &self.slots[idx] {
            Some(slot) => &slot.entry,
            None => panic!("slot {idx} is vacant"),
        }
    }

    pub fn entry_mut(&mut self, idx: usize) -> &mut FlowEntry {
        match &mut self.slots[idx] {
            Some(slot) => &mut slot.entry,
            None => panic!("slot {idx} is vacant"),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use net::FlowKey;

    fn key(n: u8) -> FlowKey {
        FlowKey::V4 {
            src: [10, 0, 0, n].into(),
            dst: [192, 168, 0, 1].into(),
            proto: 17,
        }
    }

    #[test]
    fn test_insert_lookup_stable_index() {
        let mut table = FlowTable::with_capacity(8);
        let now = 100;

        let a = key(1);
        let idx = table
            .insert(FlowEntry::initialize(a, now), a.rss_hash())
            .unwrap();
        assert_eq!(table.lookup(&a, a.rss_hash()), Some(idx));

        // More inserts don't move the first entry.
        for n in 2..=8 {
            let k = key(n);
            table.insert(FlowEntry::initialize(k, now), k.rss_hash()).unwrap();
        }
        assert_eq!(table.lookup(&a, a.rss_hash()), Some(idx));
        assert_eq!(table.entry(idx).flow, a);
    }

    #[test]
    fn test_full_table_rejects_insert() {
        let mut table = FlowTable::with_capacity(2);
        let now = 0;
        table.insert(FlowEntry::initialize(key(1), now), key(1).rss_hash()).unwrap();
        table.insert(FlowEntry::initialize(key(2), now), key(2).rss_hash()).unwrap();
        assert_eq!(
            table.insert(FlowEntry::initialize(key(3), now), key(3).rss_hash()),
            Err(TableFull)
        );
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_colliding_hashes_probe_forward() {
        let mut table = FlowTable::with_capacity(4);
        let now = 0;
        let (a, b) = (key(1), key(2));
        // Force both keys into the same bucket with an identical hash.
        let hash = 7;
        let ia = table.insert(FlowEntry::initialize(a, now), hash).unwrap();
        let ib = table.insert(FlowEntry::initialize(b, now), hash).unwrap();
        assert_ne!(ia, ib);
        assert_eq!(table.lookup(&a, hash), Some(ia));
        assert_eq!(table.lookup(&b, hash), Some(ib));
        assert_eq!(table.lookup(&key(3), hash), None);
    }
}
