//! Caching decorator over any `AsnResolver` (spec §4.5).

use super::AsnResolver;
use crate::types::AsnInfo;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;

/// Capacity of the decorator's cache (spec §4.5).
const CACHE_CAPACITY: usize = 2048;

/// Wraps any `AsnResolver` with a fixed-capacity cache. Only cache misses
/// reach the underlying resolver; eviction is naive (oldest insertion
/// dropped when over capacity), not true LRU, per spec §4.5.
pub struct CachingAsnResolver<R> {
    inner: R,
    cache: Mutex<IndexMap<Ipv4Addr, AsnInfo>>,
}

impl<R: AsnResolver> CachingAsnResolver<R> {
    #[must_use]
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            cache: Mutex::new(IndexMap::new()),
        }
    }
}

impl<R: AsnResolver> AsnResolver for CachingAsnResolver<R> {
    fn resolve(&self, ips: &[Ipv4Addr], timeout: Duration) -> HashMap<Ipv4Addr, AsnInfo> {
        let mut result = HashMap::with_capacity(ips.len());
        let mut misses = Vec::new();
        {
            let cache = self.cache.lock();
            for ip in ips {
                if let Some(info) = cache.get(ip) {
                    result.insert(*ip, info.clone());
                } else {
                    misses.push(*ip);
                }
            }
        }
        if !misses.is_empty() {
            let fetched = self.inner.resolve(&misses, timeout);
            let mut cache = self.cache.lock();
            for (ip, info) in &fetched {
                if cache.len() >= CACHE_CAPACITY && !cache.contains_key(ip) {
                    // Naive eviction: drop the oldest insertion.
                    cache.shift_remove_index(0);
                }
                cache.insert(*ip, info.clone());
            }
            result.extend(fetched);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingResolver {
        calls: AtomicUsize,
    }

    impl AsnResolver for CountingResolver {
        fn resolve(&self, ips: &[Ipv4Addr], _timeout: Duration) -> HashMap<Ipv4Addr, AsnInfo> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ips.iter()
                .map(|ip| {
                    (
                        *ip,
                        AsnInfo {
                            asn: 1,
                            name: "TEST".into(),
                            prefix: None,
                            country: None,
                            registry: None,
                        },
                    )
                })
                .collect()
        }
    }

    #[test]
    fn second_lookup_of_same_ip_hits_cache() {
        let resolver = CachingAsnResolver::new(CountingResolver {
            calls: AtomicUsize::new(0),
        });
        let ip = Ipv4Addr::new(8, 8, 8, 8);
        resolver.resolve(&[ip], Duration::from_secs(1));
        resolver.resolve(&[ip], Duration::from_secs(1));
        assert_eq!(resolver.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn eviction_drops_oldest_entry_over_capacity() {
        let resolver = CachingAsnResolver::new(CountingResolver {
            calls: AtomicUsize::new(0),
        });
        let ips: Vec<Ipv4Addr> = (0..CACHE_CAPACITY as u32 + 1)
            .map(|i| Ipv4Addr::from(i.to_be_bytes()))
            .collect();
        for ip in &ips {
            resolver.resolve(std::slice::from_ref(ip), Duration::from_secs(1));
        }
        let cache = resolver.cache.lock();
        assert_eq!(cache.len(), CACHE_CAPACITY);
        assert!(!cache.contains_key(&ips[0]));
        assert!(cache.contains_key(&ips[ips.len() - 1]));
    }
}
