//! The shared neighbor-cache machinery. ARP and ND have the same record
//! lifecycle and differ only in key type, probe format, and which
//! interfaces they run on; that difference is captured by NeighborProto
//! and the cache is generic over it.
//!
//! The cache is owned and mutated by the LLS worker only. Operations that
//! need frames transmitted (probes) return them to the caller instead of
//! touching a TX queue themselves.

use bytes::BytesMut;
use fxhash::FxHashMap;
use net::{Iface, IfaceSide, Mac, NetConfig};
use std::hash::Hash;
use std::marker::PhantomData;

/// Per-protocol operations of a neighbor cache.
pub trait NeighborProto {
    type Key: Copy + Eq + Hash + std::fmt::Display + Send + 'static;
    const NAME: &'static str;

    /// Whether this protocol serves `iface` at all.
    fn iface_enabled(iface: &Iface) -> bool;

    /// Whether `key` is on-link for `iface`.
    fn in_subnet(iface: &Iface, key: &Self::Key) -> bool;

    /// Build a resolution probe for `key` (ARP request or neighbor
    /// solicitation) to be transmitted on `iface`.
    fn build_probe(iface: &Iface, key: &Self::Key) -> BytesMut;
}

/// Invoked by the LLS worker when (or as soon as) the held address has a
/// MAC. Must be non-blocking; it runs on the LLS core.
pub type Callback<K> = Box<dyn Fn(&K, Mac) + Send>;

pub struct Holder<K> {
    pub cb: Callback<K>,
    pub lcore: u32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RecordState {
    /// A usable MAC is cached.
    Resolved,
    /// The entry went stale; a refresh probe is outstanding.
    Probed,
    /// Resolution was requested but no reply has arrived yet.
    Unresolved,
}

pub struct Record<K> {
    pub mac: Option<Mac>,
    pub state: RecordState,
    /// Tick after which the entry is no longer trusted. Advanced on every
    /// learn; a scan past this tick demotes or evicts the entry.
    pub stale_at: u64,
    /// Interface this neighbor is on-link for; selects the timeout and
    /// where probes go.
    pub iface: IfaceSide,
    holders: Vec<Holder<K>>,
}

impl<K> Record<K> {
    pub fn holder_count(&self) -> usize {
        self.holders.len()
    }
}

impl<K: std::fmt::Display> std::fmt::Debug for Record<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("mac", &self.mac.map(|m| m.to_string()))
            .field("state", &self.state)
            .field("stale_at", &self.stale_at)
            .field("iface", &self.iface)
            .field("holders", &self.holders.len())
            .finish()
    }
}

pub struct NeighborCache<P: NeighborProto> {
    records: FxHashMap<P::Key, Record<P::Key>>,
    front_timeout: u64,
    back_timeout: u64,
    _proto: PhantomData<fn() -> P>,
}

impl<P: NeighborProto> NeighborCache<P> {
    /// Build a cache with per-interface staleness timeouts, in ticks.
    pub fn new(front_timeout: u64, back_timeout: u64) -> Self {
        Self {
            records: FxHashMap::default(),
            front_timeout,
            back_timeout,
            _proto: PhantomData,
        }
    }

    fn timeout(&self, side: IfaceSide) -> u64 {
        match side {
            IfaceSide::Front => self.front_timeout,
            IfaceSide::Back => self.back_timeout,
        }
    }

    /// Pick the interface a key is reachable through: the one whose subnet
    /// contains it, falling back to the first enabled interface.
    fn iface_for_key(&self, net: &NetConfig, key: &P::Key) -> IfaceSide {
        if P::iface_enabled(&net.front) && P::in_subnet(&net.front, key) {
            return IfaceSide::Front;
        }
        if net.back_enabled && P::iface_enabled(&net.back) && P::in_subnet(&net.back, key) {
            return IfaceSide::Back;
        }
        tracing::debug!(cache = P::NAME, %key, "neighbor is not on-link; probing front");
        if P::iface_enabled(&net.front) {
            IfaceSide::Front
        } else {
            IfaceSide::Back
        }
    }

    /// Register a holder for `key`. If the entry is already resolved the
    /// callback fires immediately. A probe frame to transmit is returned
    /// only when the hold created the record: an existing unresolved or
    /// probed record already has a probe outstanding (sent at creation,
    /// or by the scan's re-probe), so repeated holds stay idempotent. A
    /// second hold from the same core replaces its callback.
    pub fn hold(
        &mut self,
        net: &NetConfig,
        now: u64,
        key: P::Key,
        cb: Callback<P::Key>,
        lcore: u32,
    ) -> Option<(IfaceSide, BytesMut)> {
        let side = self.iface_for_key(net, &key);
        let timeout = self.timeout(side);

        let (record, created) = match self.records.entry(key) {
            std::collections::hash_map::Entry::Occupied(entry) => (entry.into_mut(), false),
            std::collections::hash_map::Entry::Vacant(entry) => (
                entry.insert(Record {
                    mac: None,
                    state: RecordState::Unresolved,
                    stale_at: now + timeout,
                    iface: side,
                    holders: Vec::new(),
                }),
                true,
            ),
        };

        match record.holders.iter_mut().find(|h| h.lcore == lcore) {
            Some(holder) => holder.cb = cb,
            None => record.holders.push(Holder { cb, lcore }),
        }

        if record.state == RecordState::Resolved {
            if let Some(mac) = record.mac {
                if let Some(holder) = record.holders.iter().find(|h| h.lcore == lcore) {
                    (holder.cb)(&key, mac);
                }
                return None;
            }
        }

        if !created {
            return None;
        }
        Some((record.iface, P::build_probe(net.iface(record.iface), &key)))
    }

    /// Drop `lcore`'s holder for `key`. An entry with no holders is
    /// evicted by a later scan once it goes stale.
    pub fn put(&mut self, key: &P::Key, lcore: u32) {
        match self.records.get_mut(key) {
            Some(record) => record.holders.retain(|h| h.lcore != lcore),
            None => {
                tracing::debug!(cache = P::NAME, %key, lcore, "put for an unknown record");
            }
        }
    }

    /// Record that `key` resolves to `mac`, learned from a frame received
    /// on `side`. Fires holder callbacks when the resolution is new or
    /// changed.
    pub fn learn(&mut self, now: u64, side: IfaceSide, key: P::Key, mac: Mac) {
        let timeout = self.timeout(side);
        let record = self.records.entry(key).or_insert_with(|| Record {
            mac: None,
            state: RecordState::Unresolved,
            stale_at: 0,
            iface: side,
            holders: Vec::new(),
        });

        let changed = record.mac != Some(mac) || record.state != RecordState::Resolved;
        record.mac = Some(mac);
        record.state = RecordState::Resolved;
        record.stale_at = now + timeout;
        record.iface = side;

        if changed {
            tracing::debug!(cache = P::NAME, %key, %mac, "neighbor resolved");
            for holder in &record.holders {
                (holder.cb)(&key, mac);
            }
        }
    }

    /// Walk every record whose `stale_at` has passed: demote resolved
    /// entries and probe them; keep probing unresolved entries that still
    /// have holders; evict the rest. Returns probe frames to transmit.
    pub fn scan(&mut self, now: u64, net: &NetConfig) -> Vec<(IfaceSide, BytesMut)> {
        let mut probes = Vec::new();

        self.records.retain(|key, record| {
            if now < record.stale_at {
                return true;
            }
            match record.state {
                RecordState::Resolved => {
                    record.state = RecordState::Probed;
                    probes.push((record.iface, P::build_probe(net.iface(record.iface), key)));
                    true
                }
                RecordState::Probed | RecordState::Unresolved => {
                    if record.holders.is_empty() {
                        tracing::debug!(cache = P::NAME, %key, record = ?record, "evicting");
                        false
                    } else {
                        probes.push((record.iface, P::build_probe(net.iface(record.iface), key)));
                        true
                    }
                }
            }
        });

        probes
    }

    pub fn get(&self, key: &P::Key) -> Option<&Record<P::Key>> {
        self.records.get(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Log every record at debug level.
    pub fn dump(&self) {
        for (key, record) in &self.records {
            tracing::debug!(cache = P::NAME, %key, record = ?record);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::arp::{ArpCache, ArpProto};
    use net::IfaceConfig;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
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

    fn counting_cb(counter: &Arc<AtomicUsize>) -> Callback<Ipv4Addr> {
        let counter = counter.clone();
        Box::new(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_repeated_holds_probe_once() {
        let net = net();
        let mut cache = ArpCache::new(1_000, 1_000);
        let ip: Ipv4Addr = "10.0.0.9".parse().unwrap();
        let (first, second) = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));

        // The hold that creates the record sends the one probe.
        assert!(cache.hold(&net, 5, ip, counting_cb(&first), 1).is_some());

        // A second core holding the same still-unresolved key must not
        // trigger a duplicate probe; its holder is appended.
        assert!(cache.hold(&net, 6, ip, counting_cb(&second), 2).is_none());
        let record = cache.get(&ip).unwrap();
        assert_eq!(record.state, RecordState::Unresolved);
        assert_eq!(record.holder_count(), 2);

        // Resolution fires every holder exactly once.
        cache.learn(7, IfaceSide::Front, ip, Mac([2, 0, 0, 0, 0, 9]));
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rehold_from_same_core_replaces_callback() {
        let net = net();
        let mut cache = ArpCache::new(1_000, 1_000);
        let ip: Ipv4Addr = "10.0.0.9".parse().unwrap();
        let (stale, fresh) = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));

        assert!(cache.hold(&net, 5, ip, counting_cb(&stale), 1).is_some());
        assert!(cache.hold(&net, 6, ip, counting_cb(&fresh), 1).is_none());
        assert_eq!(cache.get(&ip).unwrap().holder_count(), 1);

        cache.learn(7, IfaceSide::Front, ip, Mac([2, 0, 0, 0, 0, 9]));
        assert_eq!(stale.load(Ordering::SeqCst), 0);
        assert_eq!(fresh.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_hold_on_resolved_record_fires_immediately() {
        let net = net();
        let mut cache = ArpCache::new(1_000, 1_000);
        let ip: Ipv4Addr = "10.0.0.9".parse().unwrap();
        let fired = Arc::new(AtomicUsize::new(0));

        cache.learn(5, IfaceSide::Front, ip, Mac([2, 0, 0, 0, 0, 9]));
        assert!(cache.hold(&net, 6, ip, counting_cb(&fired), 1).is_none());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_probe_goes_to_the_on_link_interface() {
        let net = net();
        let mut cache: NeighborCache<ArpProto> = NeighborCache::new(1_000, 1_000);
        let back_ip: Ipv4Addr = "172.16.0.9".parse().unwrap();

        let (side, _probe) = cache
            .hold(&net, 5, back_ip, Box::new(|_, _| {}), 1)
            .expect("creating hold probes");
        assert_eq!(side, IfaceSide::Back);
    }
}
