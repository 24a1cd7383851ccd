//! Path-segmentation classifier: ISP / transit / local / VPN / destination
//! (spec §4.10).

use crate::asn::{is_cgnat, is_private_or_link_local, AsnResolver};
use crate::types::{ClassifiedHop, ClassifiedTrace, HopCategory, TraceResult, VpnContext};
use std::net::Ipv4Addr;
use std::time::Duration;

/// Hostname suffixes (case-insensitive) recognised as VPN tunnel endpoints
/// (spec §4.10).
const VPN_HOSTNAME_SUFFIXES: &[&str] = &[
    ".ts.net",
    ".tailscale.com",
    ".wg.run",
    ".mullvad.net",
    ".nordvpn.com",
    ".expressvpn.com",
    ".privateinternetaccess.com",
];

/// Stateless classifier: every call batch-resolves ASNs for the trace's
/// hop IPs and walks them once, so there is nothing to construct.
pub struct Classifier;

impl Classifier {
    /// Classify `trace` into a `ClassifiedTrace`. Hostnames on individual
    /// hops, if present, are expected to already have been filled in by
    /// the facade's rDNS step (spec §2 data-flow order); this function
    /// only reads them for VPN-suffix matching, never populates them, and
    /// leaves `destination_hostname`/`public_ip_hostname` to the facade.
    pub fn classify(
        trace: &TraceResult,
        destination_ip: Ipv4Addr,
        asn_resolver: &dyn AsnResolver,
        public_ip: Option<Ipv4Addr>,
        vpn_context: Option<&VpnContext>,
        asn_timeout: Duration,
    ) -> ClassifiedTrace {
        let mut targets: Vec<Ipv4Addr> = trace.hops.iter().filter_map(|h| h.ip).collect();
        targets.push(destination_ip);
        if let Some(ip) = public_ip {
            targets.push(ip);
        }
        targets.sort_unstable();
        targets.dedup();
        let asn_map = asn_resolver.resolve(&targets, asn_timeout);

        let client_asn = public_ip.and_then(|ip| asn_map.get(&ip)).map(|i| i.asn);
        let client_as_name = public_ip.and_then(|ip| asn_map.get(&ip)).map(|i| i.name.clone());
        let destination_info = asn_map.get(&destination_ip);
        let destination_asn = destination_info.map(|i| i.asn);
        let destination_as_name = destination_info.map(|i| i.name.clone());

        let is_vpn_trace = vpn_context.is_some_and(|v| v.is_vpn_trace);
        let mut seen_public_ip = false;
        let mut in_vpn_territory = false;

        let mut hops = Vec::with_capacity(trace.hops.len());
        for hop in &trace.hops {
            let Some(x) = hop.ip else {
                hops.push(ClassifiedHop {
                    hop: hop.clone(),
                    asn: None,
                    as_name: None,
                    category: HopCategory::Unknown,
                });
                continue;
            };
            let info = asn_map.get(&x);
            let asn = info.map(|i| i.asn);
            let as_name = info.map(|i| i.name.clone());
            let is_private = is_private_or_link_local(x);
            let is_cgnat_addr = is_cgnat(x);

            let category = if is_vpn_trace {
                if !in_vpn_territory && is_vpn_entry(x, hop.hostname.as_deref(), is_cgnat_addr, vpn_context) {
                    in_vpn_territory = true;
                }
                if in_vpn_territory {
                    if x == destination_ip {
                        HopCategory::Destination
                    } else {
                        HopCategory::Vpn
                    }
                } else if is_private {
                    HopCategory::Local
                } else {
                    seen_public_ip = true;
                    classify_public_hop(x, destination_ip, asn, client_asn, destination_asn)
                }
            } else if is_private && !seen_public_ip {
                HopCategory::Local
            } else if is_private && seen_public_ip {
                HopCategory::Isp
            } else if is_cgnat_addr {
                HopCategory::Isp
            } else {
                seen_public_ip = true;
                classify_public_hop(x, destination_ip, asn, client_asn, destination_asn)
            };

            hops.push(ClassifiedHop { hop: hop.clone(), asn, as_name, category });
        }

        fill_holes(&mut hops);

        ClassifiedTrace {
            destination: trace.destination.clone(),
            destination_hostname: None,
            max_hops: trace.max_hops,
            reached: trace.reached,
            public_ip,
            public_ip_hostname: None,
            client_asn,
            client_as_name,
            destination_asn,
            destination_as_name,
            hops,
            duration: trace.duration,
        }
    }
}

/// A hop marks VPN entry if it's CGNAT, explicitly listed as a VPN-local
/// IP, or its (already-resolved) hostname ends with a known VPN suffix.
fn is_vpn_entry(ip: Ipv4Addr, hostname: Option<&str>, is_cgnat_addr: bool, vpn_context: Option<&VpnContext>) -> bool {
    if is_cgnat_addr {
        return true;
    }
    if vpn_context.is_some_and(|v| v.vpn_local_ips.contains(&ip)) {
        return true;
    }
    hostname.is_some_and(matches_vpn_suffix)
}

fn matches_vpn_suffix(hostname: &str) -> bool {
    let lower = hostname.to_lowercase();
    VPN_HOSTNAME_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix))
}

/// Categorise a public (non-VPN-territory) hop: the literal destination IP
/// wins outright, then the ASN match against the client's own ASN (ISP),
/// then against the destination's ASN; anything else, including an
/// unresolved ASN, is TRANSIT (spec §4.10 step 4).
fn classify_public_hop(x: Ipv4Addr, destination_ip: Ipv4Addr, asn: Option<u32>, client_asn: Option<u32>, destination_asn: Option<u32>) -> HopCategory {
    if x == destination_ip {
        return HopCategory::Destination;
    }
    if asn.is_some() && asn == client_asn {
        HopCategory::Isp
    } else if asn.is_some() && asn == destination_asn {
        HopCategory::Destination
    } else {
        HopCategory::Transit
    }
}

/// Fill maximal runs of timed-out hops whose immediate neighbours agree on
/// category (and, if they also agree on ASN, propagate it) (spec §4.10
/// step 5).
fn fill_holes(hops: &mut [ClassifiedHop]) {
    let len = hops.len();
    let mut i = 0;
    while i < len {
        if hops[i].hop.ip.is_some() {
            i += 1;
            continue;
        }
        let run_start = i;
        let mut run_end = i;
        while run_end < len && hops[run_end].hop.ip.is_none() {
            run_end += 1;
        }
        if run_start > 0 && run_end < len {
            let left = &hops[run_start - 1];
            let right = &hops[run_end];
            if left.hop.ip.is_some() && right.hop.ip.is_some() && left.category == right.category {
                let category = left.category;
                let asn = if left.asn.is_some() && left.asn == right.asn { left.asn } else { None };
                let as_name = if asn.is_some() { left.as_name.clone() } else { None };
                for hop in &mut hops[run_start..run_end] {
                    hop.category = category;
                    if asn.is_some() {
                        hop.asn = asn;
                        hop.as_name = as_name.clone();
                    }
                }
            }
        }
        i = run_end;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Hop;
    use std::collections::HashMap;

    struct FixedResolver(HashMap<Ipv4Addr, crate::types::AsnInfo>);

    impl AsnResolver for FixedResolver {
        fn resolve(&self, ips: &[Ipv4Addr], _timeout: Duration) -> HashMap<Ipv4Addr, crate::types::AsnInfo> {
            ips.iter().filter_map(|ip| self.0.get(ip).map(|i| (*ip, i.clone()))).collect()
        }
    }

    fn asn(n: u32, name: &str) -> crate::types::AsnInfo {
        crate::types::AsnInfo {
            asn: n,
            name: name.to_string(),
            prefix: None,
            country: None,
            registry: None,
        }
    }

    fn hop(ttl: u8, ip: Option<&str>) -> Hop {
        Hop {
            ttl,
            ip: ip.map(|s| s.parse().unwrap()),
            rtt: ip.map(|_| Duration::from_millis(1)),
            reached_destination: false,
            hostname: None,
        }
    }

    #[test]
    fn private_hops_before_any_public_ip_are_local() {
        let trace = TraceResult {
            destination: "8.8.8.8".into(),
            max_hops: 2,
            reached: false,
            hops: vec![hop(1, Some("192.168.1.1")), hop(2, Some("10.0.0.1"))],
            duration: Duration::ZERO,
        };
        let resolver = FixedResolver(HashMap::new());
        let classified = Classifier::classify(&trace, "8.8.8.8".parse().unwrap(), &resolver, None, None, Duration::from_secs(1));
        assert_eq!(classified.hops[0].category, HopCategory::Local);
        assert_eq!(classified.hops[1].category, HopCategory::Local);
    }

    #[test]
    fn public_hop_matching_client_asn_is_isp() {
        let client_ip: Ipv4Addr = "203.0.113.9".parse().unwrap();
        let mut map = HashMap::new();
        map.insert(client_ip, asn(64500, "EXAMPLE-ISP"));
        let resolver = FixedResolver(map);
        let trace = TraceResult {
            destination: "8.8.8.8".into(),
            max_hops: 1,
            reached: false,
            hops: vec![hop(1, Some("203.0.113.9"))],
            duration: Duration::ZERO,
        };
        let classified = Classifier::classify(&trace, "8.8.8.8".parse().unwrap(), &resolver, Some(client_ip), None, Duration::from_secs(1));
        assert_eq!(classified.hops[0].category, HopCategory::Isp);
    }

    #[test]
    fn hop_at_destination_ip_is_destination_regardless_of_asn() {
        let dest: Ipv4Addr = "8.8.8.8".parse().unwrap();
        let resolver = FixedResolver(HashMap::new());
        let trace = TraceResult {
            destination: dest.to_string(),
            max_hops: 1,
            reached: true,
            hops: vec![hop(1, Some("8.8.8.8"))],
            duration: Duration::ZERO,
        };
        let classified = Classifier::classify(&trace, dest, &resolver, None, None, Duration::from_secs(1));
        assert_eq!(classified.hops[0].category, HopCategory::Destination);
    }

    #[test]
    fn unresolved_public_hop_is_transit() {
        let resolver = FixedResolver(HashMap::new());
        let trace = TraceResult {
            destination: "8.8.8.8".into(),
            max_hops: 1,
            reached: false,
            hops: vec![hop(1, Some("203.0.113.50"))],
            duration: Duration::ZERO,
        };
        let classified = Classifier::classify(&trace, "8.8.8.8".parse().unwrap(), &resolver, None, None, Duration::from_secs(1));
        assert_eq!(classified.hops[0].category, HopCategory::Transit);
    }

    #[test]
    fn hole_filling_propagates_category_and_asn_between_matching_neighbours() {
        let ip_a: Ipv4Addr = "203.0.113.1".parse().unwrap();
        let ip_b: Ipv4Addr = "203.0.113.2".parse().unwrap();
        let mut map = HashMap::new();
        map.insert(ip_a, asn(64501, "TRANSIT-A"));
        map.insert(ip_b, asn(64501, "TRANSIT-A"));
        let resolver = FixedResolver(map);
        let trace = TraceResult {
            destination: "9.9.9.9".into(),
            max_hops: 3,
            reached: false,
            hops: vec![hop(1, Some("203.0.113.1")), hop(2, None), hop(3, Some("203.0.113.2"))],
            duration: Duration::ZERO,
        };
        let classified = Classifier::classify(&trace, "9.9.9.9".parse().unwrap(), &resolver, None, None, Duration::from_secs(1));
        assert_eq!(classified.hops[1].category, classified.hops[0].category);
        assert_eq!(classified.hops[1].asn, Some(64501));
    }

    #[test]
    fn hole_filling_leaves_run_unknown_when_neighbours_disagree() {
        let resolver = FixedResolver(HashMap::new());
        let trace = TraceResult {
            destination: "9.9.9.9".into(),
            max_hops: 3,
            reached: false,
            hops: vec![hop(1, Some("192.168.1.1")), hop(2, None), hop(3, Some("203.0.113.1"))],
            duration: Duration::ZERO,
        };
        let classified = Classifier::classify(&trace, "9.9.9.9".parse().unwrap(), &resolver, None, None, Duration::from_secs(1));
        assert_ne!(classified.hops[0].category, classified.hops[2].category);
        assert_eq!(classified.hops[1].category, HopCategory::Unknown);
    }

    #[test]
    fn vpn_trace_categorises_entry_and_beyond_as_vpn() {
        let vpn_ctx = VpnContext {
            is_vpn_trace: true,
            vpn_local_ips: vec![],
            interface_name: None,
        };
        let resolver = FixedResolver(HashMap::new());
        let trace = TraceResult {
            destination: "9.9.9.9".into(),
            max_hops: 2,
            reached: true,
            hops: vec![hop(1, Some("100.64.0.5")), hop(2, Some("9.9.9.9"))],
            duration: Duration::ZERO,
        };
        let classified = Classifier::classify(&trace, "9.9.9.9".parse().unwrap(), &resolver, None, Some(&vpn_ctx), Duration::from_secs(1));
        assert_eq!(classified.hops[0].category, HopCategory::Vpn);
        assert_eq!(classified.hops[1].category, HopCategory::Destination);
    }
}
