//! Hybrid ASN resolver: local database first, DNS fallback for misses
//! (spec §4.5).

use super::{AsnResolver, CymruDnsResolver, LocalAsnResolver};
use crate::types::AsnInfo;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;

pub struct HybridAsnResolver {
    local: Option<LocalAsnResolver>,
    dns: CymruDnsResolver,
    dns_timeout: Duration,
}

impl HybridAsnResolver {
    /// `local` is optional: if the on-disk database failed to load or was
    /// never configured, every lookup falls through to DNS (SPEC_FULL §C).
    #[must_use]
    pub fn new(local: Option<LocalAsnResolver>, dns: CymruDnsResolver, dns_timeout: Duration) -> Self {
        Self {
            local,
            dns,
            dns_timeout,
        }
    }
}

impl AsnResolver for HybridAsnResolver {
    fn resolve(&self, ips: &[Ipv4Addr], timeout: Duration) -> HashMap<Ipv4Addr, AsnInfo> {
        let Some(local) = &self.local else {
            return self.dns.resolve(ips, timeout);
        };
        let mut resolved = local.resolve(ips, timeout);
        let missing: Vec<Ipv4Addr> = ips
            .iter()
            .copied()
            .filter(|ip| !resolved.contains_key(ip))
            .collect();
        if !missing.is_empty() {
            resolved.extend(self.dns.resolve(&missing, self.dns_timeout));
        }
        resolved
    }
}
