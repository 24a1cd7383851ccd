//! Team Cymru DNS-based ASN resolver (spec §4.5, §6).

use super::{is_publicly_routed, AsnResolver};
use crate::types::AsnInfo;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;
use trust_dns_resolver::Resolver;

/// Bound on concurrent Cymru TXT lookups issued for one `resolve` call
/// (ambient resource control, SPEC_FULL §C).
const MAX_CONCURRENT_LOOKUPS: usize = 8;

const REGISTRY_TOKENS: &[&str] = &[
    "arin", "lacnic", "ripe", "ripencc", "apnic", "afrinic", "jpnic", "krnic",
];

/// Resolves ASN ownership by querying `origin.asn.cymru.com` and
/// `asn.cymru.com` TXT records.
pub struct CymruDnsResolver {
    resolver: Resolver,
}

impl CymruDnsResolver {
    #[must_use]
    pub fn new(resolver: Resolver) -> Self {
        Self { resolver }
    }

    fn lookup_origin(&self, ip: Ipv4Addr) -> Option<OriginRecord> {
        let [a, b, c, d] = ip.octets();
        let query = format!("{d}.{c}.{b}.{a}.origin.asn.cymru.com");
        let response = self.resolver.txt_lookup(query).ok()?;
        for record in response.iter() {
            for chars in record.iter() {
                let text = String::from_utf8_lossy(chars);
                if let Some(origin) = parse_origin_record(&text) {
                    return Some(origin);
                }
            }
        }
        None
    }

    fn lookup_as_name(&self, asn: u32) -> Option<String> {
        let query = format!("AS{asn}.asn.cymru.com");
        let response = self.resolver.txt_lookup(query).ok()?;
        for record in response.iter() {
            for chars in record.iter() {
                let text = String::from_utf8_lossy(chars);
                if let Some(name) = extract_as_name(&text) {
                    return Some(name);
                }
            }
        }
        None
    }
}

impl AsnResolver for CymruDnsResolver {
    fn resolve(&self, ips: &[Ipv4Addr], _timeout: Duration) -> HashMap<Ipv4Addr, AsnInfo> {
        let targets: Vec<Ipv4Addr> = ips
            .iter()
            .copied()
            .filter(|ip| is_publicly_routed(*ip))
            .collect();

        let origins: Mutex<HashMap<Ipv4Addr, OriginRecord>> = Mutex::new(HashMap::new());
        crate::util::run_bounded(&targets, MAX_CONCURRENT_LOOKUPS, |ip| {
            if let Some(origin) = self.lookup_origin(*ip) {
                origins.lock().insert(*ip, origin);
            }
        });
        let origins = origins.into_inner();

        // Resolve each distinct ASN's name exactly once per call (spec
        // §4.5: "cached per ASN within a single call").
        let distinct_asns: Vec<u32> = origins
            .values()
            .map(|o| o.asn)
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        let names: Mutex<HashMap<u32, String>> = Mutex::new(HashMap::new());
        crate::util::run_bounded(&distinct_asns, MAX_CONCURRENT_LOOKUPS, |asn| {
            if let Some(name) = self.lookup_as_name(*asn) {
                names.lock().insert(*asn, name);
            }
        });
        let names = names.into_inner();

        origins
            .into_iter()
            .map(|(ip, origin)| {
                let name = names.get(&origin.asn).cloned().unwrap_or_default();
                (
                    ip,
                    AsnInfo {
                        asn: origin.asn,
                        name,
                        prefix: origin.prefix,
                        country: origin.country,
                        registry: origin.registry,
                    },
                )
            })
            .collect()
    }
}

struct OriginRecord {
    asn: u32,
    prefix: Option<String>,
    country: Option<String>,
    registry: Option<String>,
}

/// Parse one `origin.asn` TXT record: `AS | BGP Prefix | CC | Registry |
/// Allocated`, where the first field MAY contain multiple whitespace
/// separated ASNs (take the first) (spec §6).
fn parse_origin_record(text: &str) -> Option<OriginRecord> {
    let fields: Vec<&str> = text.split('|').map(str::trim).collect();
    let asn_field = fields.first()?;
    let asn = asn_field.split_whitespace().next()?.parse::<u32>().ok()?;
    let prefix = fields.get(1).filter(|s| !s.is_empty()).map(|s| s.to_string());
    let country = fields.get(2).filter(|s| !s.is_empty()).map(|s| s.to_string());
    let registry = fields.get(3).filter(|s| !s.is_empty()).map(|s| s.to_string());
    Some(OriginRecord {
        asn,
        prefix,
        country,
        registry,
    })
}

/// AS-name extraction per spec §4.5: prefer field index 1 when present and
/// not a 2-letter country code or known registry token; otherwise the
/// first remaining field containing a letter.
fn extract_as_name(text: &str) -> Option<String> {
    let fields: Vec<&str> = text.split('|').map(str::trim).collect();
    if let Some(candidate) = fields.get(1) {
        if !candidate.is_empty() && !is_country_code_or_registry(candidate) {
            return Some((*candidate).to_string());
        }
    }
    fields
        .iter()
        .skip(2)
        .find(|f| f.chars().any(|c| c.is_alphabetic()) && !is_country_code_or_registry(f))
        .map(|s| (*s).to_string())
}

fn is_country_code_or_registry(field: &str) -> bool {
    let is_country_code = field.len() == 2 && field.chars().all(|c| c.is_ascii_alphabetic());
    let is_registry = REGISTRY_TOKENS.contains(&field.to_lowercase().as_str());
    is_country_code || is_registry
}
