//! The data model shared by every engine (spec §3).
//!
//! None of these types hold shared mutable state: each is produced by a
//! single engine call and handed to the caller by value.

use std::net::Ipv4Addr;
use std::time::{Duration, SystemTime};

/// A flow identifier: the ICMP identifier field an ECMP router's hash will
/// see, plus the variation it was derived from (spec §3).
///
/// Two flow identifiers with different `variation` differ in their low
/// bits so that varying `variation` systematically perturbs whichever ECMP
/// hash a router applies to the identifier field (Dublin-style
/// enumeration). `icmp_id` is held constant for every probe within one
/// trace (Paris-style consistency).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
#[display(fmt = "{icmp_id:#06x}/{variation}")]
pub struct FlowIdentifier {
    pub icmp_id: u16,
    pub variation: u32,
}

/// Odd multiplier used to spread `variation` across the low bits of the
/// 16-bit ICMP identifier space; any odd constant works since it is
/// invertible mod 2^16, a prime is used so the spread is simple to reason
/// about.
const VARIATION_MULTIPLIER: u32 = 40503;

impl FlowIdentifier {
    /// The base identifier (`variation == 0`), derived from `seed`.
    #[must_use]
    pub fn base(seed: u16) -> Self {
        Self {
            icmp_id: seed,
            variation: 0,
        }
    }

    /// Generate the flow identifier for `variation`, holding `base`'s seed
    /// fixed and perturbing the low bits deterministically.
    #[must_use]
    pub fn generate(base: Self, variation: u32) -> Self {
        let perturbation = (variation.wrapping_mul(VARIATION_MULTIPLIER)) as u16;
        Self {
            icmp_id: base.icmp_id ^ perturbation,
            variation,
        }
    }
}

/// A key identifying one outstanding or completed probe within a single
/// engine instance. At most one probe per `ProbeKey` is outstanding at a
/// time (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProbeKey {
    pub icmp_id: u16,
    pub sequence: u16,
}

impl ProbeKey {
    #[must_use]
    pub fn new(icmp_id: u16, sequence: u16) -> Self {
        Self { icmp_id, sequence }
    }
}

/// A single hop in a traceroute result.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Hop {
    /// 1-based time-to-live this hop corresponds to.
    pub ttl: u8,
    /// The IPv4 address that responded at this TTL, or `None` on timeout.
    pub ip: Option<Ipv4Addr>,
    /// Round-trip time, or `None` iff the probe timed out.
    #[serde(with = "duration_opt_millis")]
    pub rtt: Option<Duration>,
    /// True only when `ip` is the resolved destination address.
    pub reached_destination: bool,
    /// Populated only after reverse-DNS resolution; `None` until then.
    pub hostname: Option<String>,
}

impl Hop {
    /// A placeholder hop for a TTL that never received a reply.
    #[must_use]
    pub fn timeout(ttl: u8) -> Self {
        Self {
            ttl,
            ip: None,
            rtt: None,
            reached_destination: false,
            hostname: None,
        }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.ip.is_none()
    }
}

/// The result of one traceroute operation.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TraceResult {
    pub destination: String,
    pub max_hops: u8,
    pub reached: bool,
    /// Ordered by TTL ascending; length is `min(max_hops, reached_ttl)`.
    pub hops: Vec<Hop>,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

impl TraceResult {
    /// The destination IP, if any hop reached it.
    #[must_use]
    pub fn destination_hop(&self) -> Option<&Hop> {
        self.hops.iter().find(|h| h.reached_destination)
    }
}

/// An autonomous-system record as returned by an `AsnResolver`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AsnInfo {
    pub asn: u32,
    pub name: String,
    pub prefix: Option<String>,
    pub country: Option<String>,
    pub registry: Option<String>,
}

/// The path-segmentation category assigned to a hop (spec §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum HopCategory {
    Local,
    Isp,
    Transit,
    Destination,
    Vpn,
    Unknown,
}

/// A `Hop` enriched with classification output.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ClassifiedHop {
    #[serde(flatten)]
    pub hop: Hop,
    pub asn: Option<u32>,
    pub as_name: Option<String>,
    pub category: HopCategory,
}

/// A `TraceResult` enriched with classification and naming data (spec §3).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ClassifiedTrace {
    pub destination: String,
    pub destination_hostname: Option<String>,
    pub max_hops: u8,
    pub reached: bool,
    pub public_ip: Option<Ipv4Addr>,
    pub public_ip_hostname: Option<String>,
    pub client_asn: Option<u32>,
    pub client_as_name: Option<String>,
    pub destination_asn: Option<u32>,
    pub destination_as_name: Option<String>,
    pub hops: Vec<ClassifiedHop>,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

/// One response (or timeout) to a single ping sequence number.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PingResponse {
    /// Unique within a single `PingEngine` result.
    pub sequence: u32,
    #[serde(with = "duration_opt_millis")]
    pub rtt: Option<Duration>,
    pub ttl_observed: Option<u8>,
    #[serde(with = "system_time_millis")]
    pub timestamp: SystemTime,
}

/// Aggregate statistics over a ping result (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PingStatistics {
    pub sent: u32,
    pub received: u32,
    pub packet_loss: f64,
    #[serde(with = "duration_opt_millis")]
    pub min_rtt: Option<Duration>,
    #[serde(with = "duration_opt_millis")]
    pub avg_rtt: Option<Duration>,
    #[serde(with = "duration_opt_millis")]
    pub max_rtt: Option<Duration>,
    #[serde(with = "duration_opt_millis")]
    pub jitter: Option<Duration>,
}

impl PingStatistics {
    /// Compute statistics from a full set of per-sequence responses.
    ///
    /// `jitter` (population standard deviation of received RTTs) is `None`
    /// unless at least two responses were received, per spec §3.
    #[must_use]
    pub fn compute(sent: u32, responses: &[PingResponse]) -> Self {
        let rtts: Vec<Duration> = responses.iter().filter_map(|r| r.rtt).collect();
        let received = rtts.len() as u32;
        let packet_loss = if sent == 0 {
            0.0
        } else {
            1.0 - (f64::from(received) / f64::from(sent))
        };
        let min_rtt = rtts.iter().min().copied();
        let max_rtt = rtts.iter().max().copied();
        let avg_rtt = if rtts.is_empty() {
            None
        } else {
            let total: Duration = rtts.iter().sum();
            Some(total / received)
        };
        let jitter = if rtts.len() >= 2 {
            let mean = avg_rtt.unwrap().as_secs_f64();
            let variance = rtts
                .iter()
                .map(|d| {
                    let diff = d.as_secs_f64() - mean;
                    diff * diff
                })
                .sum::<f64>()
                / (rtts.len() as f64);
            Some(Duration::from_secs_f64(variance.sqrt()))
        } else {
            None
        };
        Self {
            sent,
            received,
            packet_loss,
            min_rtt,
            avg_rtt,
            max_rtt,
            jitter,
        }
    }
}

/// A ping session's full result: every sequence's response plus the
/// aggregated statistics.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PingResult {
    pub target: String,
    /// Sorted by sequence.
    pub responses: Vec<PingResponse>,
    pub statistics: PingStatistics,
}

/// One discovered ECMP path (spec §3).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DiscoveredPath {
    pub flow_id: FlowIdentifier,
    pub trace: ClassifiedTrace,
    /// Comma-joined responder IPs, `*` standing in for a timeout.
    pub fingerprint: String,
    pub is_unique: bool,
}

impl DiscoveredPath {
    /// Compute the fingerprint for a classified trace per spec §3.
    #[must_use]
    pub fn fingerprint_of(trace: &ClassifiedTrace) -> String {
        trace
            .hops
            .iter()
            .map(|h| match h.hop.ip {
                Some(ip) => ip.to_string(),
                None => "*".to_string(),
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// The full result of a multipath discovery run (spec §3, §4.9).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NetworkTopology {
    pub destination: String,
    pub destination_ip: Ipv4Addr,
    pub source_interface: Option<String>,
    pub source_ip: Option<Ipv4Addr>,
    pub public_ip: Option<Ipv4Addr>,
    pub paths: Vec<DiscoveredPath>,
    pub unique_path_count: usize,
    #[serde(with = "duration_millis")]
    pub discovery_duration: Duration,
}

impl NetworkTopology {
    /// The set of distinct responder IPs across all paths, sorted by
    /// `(ttl, ip)`.
    #[must_use]
    pub fn unique_hops(&self) -> Vec<(u8, Ipv4Addr)> {
        let mut seen = std::collections::BTreeSet::new();
        for path in &self.paths {
            for hop in &path.trace.hops {
                if let Some(ip) = hop.hop.ip {
                    seen.insert((hop.hop.ttl, ip));
                }
            }
        }
        seen.into_iter().collect()
    }

    /// The literal responder "value" at `(path, ttl index)`, `*` for a
    /// timeout, used by `divergence_point`.
    fn value_at(path: &DiscoveredPath, index: usize) -> Option<String> {
        path.trace
            .hops
            .get(index)
            .map(|h| h.hop.ip.map_or_else(|| "*".to_string(), |ip| ip.to_string()))
    }

    /// The smallest TTL (1-based position) at which responder IPs across
    /// paths diverge; `None` if all paths agree or only one path exists.
    #[must_use]
    pub fn divergence_point(&self) -> Option<u8> {
        if self.paths.len() < 2 {
            return None;
        }
        let max_len = self.paths.iter().map(|p| p.trace.hops.len()).max()?;
        for index in 0..max_len {
            let mut values = std::collections::HashSet::new();
            for path in &self.paths {
                values.insert(Self::value_at(path, index));
            }
            if values.len() > 1 {
                return Some((index + 1) as u8);
            }
        }
        None
    }

    /// The longest prefix of TTL positions where every path agrees on the
    /// responder IP (literal value, `*` included).
    #[must_use]
    pub fn common_prefix(&self) -> Vec<Option<Ipv4Addr>> {
        if self.paths.is_empty() {
            return Vec::new();
        }
        let max_len = self.paths.iter().map(|p| p.trace.hops.len()).max().unwrap_or(0);
        let mut prefix = Vec::new();
        for index in 0..max_len {
            let Some(first_val) = self.paths[0].trace.hops.get(index).map(|h| h.hop.ip) else {
                break;
            };
            let all_match = self
                .paths
                .iter()
                .all(|p| p.trace.hops.get(index).map(|h| h.hop.ip) == Some(first_val));
            if all_match {
                prefix.push(first_val);
            } else {
                break;
            }
        }
        prefix
    }

    /// Paths that pass through the given responder IP at any hop.
    #[must_use]
    pub fn paths_through_ip(&self, ip: Ipv4Addr) -> Vec<&DiscoveredPath> {
        self.paths
            .iter()
            .filter(|p| p.trace.hops.iter().any(|h| h.hop.ip == Some(ip)))
            .collect()
    }

    /// Paths that pass through a hop classified under the given ASN.
    #[must_use]
    pub fn paths_through_asn(&self, asn: u32) -> Vec<&DiscoveredPath> {
        self.paths
            .iter()
            .filter(|p| p.trace.hops.iter().any(|h| h.asn == Some(asn)))
            .collect()
    }
}

/// Context describing whether/how a trace runs over a VPN tunnel (spec
/// §4.10).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VpnContext {
    pub is_vpn_trace: bool,
    pub vpn_local_ips: Vec<Ipv4Addr>,
    /// Interface name the trace was sent over, used only for diagnostics;
    /// detection itself is driven by `is_vpn_trace`/`vpn_local_ips`/rDNS
    /// hostname suffixes per spec §4.10.
    pub interface_name: Option<String>,
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u128(d.as_millis())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

mod duration_opt_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let millis: Option<u64> = Option::deserialize(d)?;
        Ok(millis.map(Duration::from_millis))
    }
}

mod system_time_millis {
    use serde::{Deserializer, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S: Serializer>(t: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
        let millis = t
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis();
        s.serialize_u128(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SystemTime, D::Error> {
        use serde::Deserialize;
        let millis = u64::deserialize(d)?;
        Ok(UNIX_EPOCH + Duration::from_millis(millis))
    }
}
