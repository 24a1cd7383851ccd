//! Reverse-DNS cache with TTL and bounded size (spec §4.6).

use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};

/// Bound on concurrent PTR lookups issued for one batch (SPEC_FULL §C).
const MAX_CONCURRENT_LOOKUPS: usize = 8;

struct CacheEntry {
    hostname: Option<String>,
    inserted_at: Instant,
}

/// Maps IPv4 → hostname with a TTL and a bounded size. Absent hostnames
/// (the system resolver returned nothing) are cached as negative entries
/// so repeated misses don't repeatedly hit the network.
pub struct RdnsCache {
    entries: Mutex<IndexMap<Ipv4Addr, CacheEntry>>,
    ttl: Duration,
    capacity: usize,
}

impl RdnsCache {
    #[must_use]
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: Mutex::new(IndexMap::new()),
            ttl,
            capacity,
        }
    }

    /// Resolve `ip`'s hostname, consulting (and populating) the cache.
    pub fn lookup(&self, ip: Ipv4Addr) -> Option<String> {
        if let Some(hostname) = self.fresh_cached(ip) {
            return hostname;
        }
        let hostname = reverse_lookup(ip);
        self.insert(ip, hostname.clone());
        hostname
    }

    /// Resolve a batch of IPs concurrently, returning a hostname (or
    /// `None`) for every input address.
    #[must_use]
    pub fn batch_lookup(&self, ips: &[Ipv4Addr]) -> HashMap<Ipv4Addr, Option<String>> {
        let result: Mutex<HashMap<Ipv4Addr, Option<String>>> = Mutex::new(HashMap::new());
        crate::util::run_bounded(ips, MAX_CONCURRENT_LOOKUPS, |ip| {
            let hostname = self.lookup(*ip);
            result.lock().insert(*ip, hostname);
        });
        result.into_inner()
    }

    /// Drop every cached entry (invoked by `Facade::network_changed`, spec
    /// §4.11).
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    fn fresh_cached(&self, ip: Ipv4Addr) -> Option<Option<String>> {
        let entries = self.entries.lock();
        let entry = entries.get(&ip)?;
        if entry.inserted_at.elapsed() < self.ttl {
            Some(entry.hostname.clone())
        } else {
            None
        }
    }

    fn insert(&self, ip: Ipv4Addr, hostname: Option<String>) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity && !entries.contains_key(&ip) {
            evict_oldest(&mut entries);
        }
        // Re-insert to refresh position, an approximate-LRU acceptable per
        // spec §4.6.
        entries.shift_remove(&ip);
        entries.insert(
            ip,
            CacheEntry {
                hostname,
                inserted_at: Instant::now(),
            },
        );
    }
}

fn evict_oldest(entries: &mut IndexMap<Ipv4Addr, CacheEntry>) {
    let oldest = entries
        .iter()
        .min_by_key(|(_, e)| e.inserted_at)
        .map(|(ip, _)| *ip);
    if let Some(ip) = oldest {
        entries.shift_remove(&ip);
    }
}

fn reverse_lookup(ip: Ipv4Addr) -> Option<String> {
    dns_lookup::lookup_addr(&IpAddr::V4(ip)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_entries_are_cached() {
        let cache = RdnsCache::new(Duration::from_secs(60), 16);
        // 192.0.2.0/24 is TEST-NET-1, reserved for documentation and will
        // not resolve; insert the negative result directly to avoid a real
        // network call in this test.
        cache.insert(Ipv4Addr::new(192, 0, 2, 1), None);
        assert_eq!(cache.fresh_cached(Ipv4Addr::new(192, 0, 2, 1)), Some(None));
    }

    #[test]
    fn capacity_bound_evicts_oldest_entry() {
        let cache = RdnsCache::new(Duration::from_secs(60), 2);
        cache.insert(Ipv4Addr::new(1, 1, 1, 1), Some("one".into()));
        std::thread::sleep(Duration::from_millis(2));
        cache.insert(Ipv4Addr::new(2, 2, 2, 2), Some("two".into()));
        std::thread::sleep(Duration::from_millis(2));
        cache.insert(Ipv4Addr::new(3, 3, 3, 3), Some("three".into()));
        let entries = cache.entries.lock();
        assert_eq!(entries.len(), 2);
        assert!(!entries.contains_key(&Ipv4Addr::new(1, 1, 1, 1)));
    }

    #[test]
    fn expired_entry_is_not_returned_as_fresh() {
        let cache = RdnsCache::new(Duration::from_millis(1), 16);
        cache.insert(Ipv4Addr::new(1, 1, 1, 1), Some("one".into()));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.fresh_cached(Ipv4Addr::new(1, 1, 1, 1)), None);
    }

    #[test]
    fn clear_empties_the_cache() {
        let cache = RdnsCache::new(Duration::from_secs(60), 16);
        cache.insert(Ipv4Addr::new(1, 1, 1, 1), Some("one".into()));
        cache.clear();
        assert_eq!(cache.fresh_cached(Ipv4Addr::new(1, 1, 1, 1)), None);
    }
}
