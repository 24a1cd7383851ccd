//! Local in-memory IP→ASN lookup backed by a MaxMind-format database (spec
//! §4.5, SPEC_FULL §C).

use super::{is_publicly_routed, AsnResolver};
use crate::types::AsnInfo;
use maxminddb::geoip2;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;

/// A resolver performing pure in-memory prefix lookups against a loaded
/// `GeoLite2-ASN`-shaped database.
pub struct LocalAsnResolver {
    reader: maxminddb::Reader<Vec<u8>>,
}

impl LocalAsnResolver {
    /// Load the database at `path`. The database is static for the
    /// lifetime of this resolver; periodic refresh, if desired, is the
    /// caller's responsibility (recreate the resolver with a freshly
    /// loaded reader).
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let reader = maxminddb::Reader::open_readfile(path)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        Ok(Self { reader })
    }

    fn lookup_one(&self, ip: Ipv4Addr) -> Option<AsnInfo> {
        let record: geoip2::Asn = self.reader.lookup(IpAddr::V4(ip)).ok()?;
        let asn = record.autonomous_system_number?;
        let name = record
            .autonomous_system_organization
            .unwrap_or_default()
            .to_string();
        Some(AsnInfo {
            asn,
            name,
            prefix: None,
            country: None,
            registry: None,
        })
    }
}

impl AsnResolver for LocalAsnResolver {
    fn resolve(&self, ips: &[Ipv4Addr], _timeout: Duration) -> HashMap<Ipv4Addr, AsnInfo> {
        ips.iter()
            .copied()
            .filter(|ip| is_publicly_routed(*ip))
            .filter_map(|ip| self.lookup_one(ip).map(|info| (ip, info)))
            .collect()
    }
}
