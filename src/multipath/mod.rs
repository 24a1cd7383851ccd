//! ECMP path enumeration by running many traceroutes across flow
//! identifiers (spec §4.9).

use crate::clock::MonoClock;
use crate::error::{NetpathError, NetpathResult};
use crate::types::{ClassifiedTrace, DiscoveredPath, FlowIdentifier, NetworkTopology};
use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Parameters governing one multipath discovery run.
#[derive(Debug, Clone)]
pub struct MultipathConfig {
    pub flow_variations: u32,
    pub max_paths: usize,
    pub early_stop_threshold: usize,
    pub timeout: Duration,
    pub max_hops: u8,
    /// Concurrency of each discovery round (spec §4.9 step 1: "batches of
    /// ≤5").
    pub batch_size: usize,
}

impl Default for MultipathConfig {
    fn default() -> Self {
        Self {
            flow_variations: 20,
            max_paths: 8,
            early_stop_threshold: 5,
            timeout: Duration::from_secs(3),
            max_hops: 30,
            batch_size: 5,
        }
    }
}

/// Enumerates ECMP paths toward `destination_ip`. Each variation's
/// traceroute-plus-classification is produced by `trace_classified`, a
/// closure supplied by the facade so this engine never depends on the
/// classifier, ASN resolver, or rDNS cache directly — it only knows how to
/// batch, fingerprint, and merge.
pub struct MultipathEngine;

impl Default for MultipathEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipathEngine {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    #[allow(clippy::too_many_arguments)]
    pub fn run<F>(
        &self,
        destination: String,
        destination_ip: Ipv4Addr,
        base_flow: FlowIdentifier,
        config: &MultipathConfig,
        source_interface: Option<String>,
        source_ip: Option<Ipv4Addr>,
        public_ip: Option<Ipv4Addr>,
        cancel: &AtomicBool,
        trace_classified: F,
    ) -> NetpathResult<NetworkTopology>
    where
        F: Fn(FlowIdentifier) -> NetpathResult<ClassifiedTrace> + Sync,
    {
        log::debug!("discovering paths to {destination}, variations={}, max_paths={}", config.flow_variations, config.max_paths);
        let clock = MonoClock::new();
        let start = clock.now();
        let batch_size = config.batch_size.max(1);
        let variations: Vec<u32> = (0..config.flow_variations).collect();

        let mut paths: Vec<DiscoveredPath> = Vec::new();
        let mut unique_count: usize = 0;
        let mut window: VecDeque<bool> = VecDeque::with_capacity(config.early_stop_threshold);

        'batches: for chunk in variations.chunks(batch_size) {
            if cancel.load(Ordering::Relaxed) {
                return Err(NetpathError::Cancelled);
            }

            let flow_ids: Vec<FlowIdentifier> = chunk.iter().map(|&v| FlowIdentifier::generate(base_flow, v)).collect();
            let results = run_batch(&flow_ids, &trace_classified)?;

            for (flow_id, trace) in flow_ids.into_iter().zip(results) {
                if cancel.load(Ordering::Relaxed) {
                    return Err(NetpathError::Cancelled);
                }
                let fingerprint = DiscoveredPath::fingerprint_of(&trace);
                let matched_idx = paths
                    .iter()
                    .position(|p| p.is_unique && paths_match(&p.trace, &trace));

                let is_new_unique = matched_idx.is_none();
                if let Some(idx) = matched_idx {
                    merge_into(&mut paths[idx].trace, &trace);
                    paths[idx].fingerprint = DiscoveredPath::fingerprint_of(&paths[idx].trace);
                } else {
                    unique_count += 1;
                }
                paths.push(DiscoveredPath {
                    flow_id,
                    trace,
                    fingerprint,
                    is_unique: is_new_unique,
                });

                window.push_back(is_new_unique);
                if window.len() > config.early_stop_threshold {
                    window.pop_front();
                }

                if unique_count >= config.max_paths {
                    log::trace!("multipath discovery stopped: max_paths reached");
                    break 'batches;
                }
                if window.len() == config.early_stop_threshold && window.iter().all(|&new| !new) {
                    log::trace!("multipath discovery stopped: {} consecutive duplicate paths", config.early_stop_threshold);
                    break 'batches;
                }
            }
        }

        Ok(NetworkTopology {
            destination,
            destination_ip,
            source_interface,
            source_ip,
            public_ip,
            paths,
            unique_path_count: unique_count,
            discovery_duration: clock.now().since(start),
        })
    }
}

/// Run one batch of traceroutes concurrently (spec §4.9 step 1), returning
/// results in the same order as `flow_ids`. Propagates the first fatal
/// error encountered, per the failure semantics in spec §4.7/§7.
fn run_batch<F>(flow_ids: &[FlowIdentifier], trace_classified: &F) -> NetpathResult<Vec<ClassifiedTrace>>
where
    F: Fn(FlowIdentifier) -> NetpathResult<ClassifiedTrace> + Sync,
{
    let mut slots: Vec<Option<NetpathResult<ClassifiedTrace>>> = (0..flow_ids.len()).map(|_| None).collect();
    std::thread::scope(|scope| {
        let handles: Vec<_> = flow_ids
            .iter()
            .map(|&flow_id| scope.spawn(move || trace_classified(flow_id)))
            .collect();
        for (slot, handle) in slots.iter_mut().zip(handles) {
            *slot = Some(handle.join().unwrap_or(Err(NetpathError::Cancelled)));
        }
    });
    slots.into_iter().flatten().collect()
}

/// Two traces describe the same path when they have equal length and, at
/// every position, either agree on the responder IP or at least one of
/// them timed out there (spec §4.9 step 3).
fn paths_match(a: &ClassifiedTrace, b: &ClassifiedTrace) -> bool {
    if a.hops.len() != b.hops.len() {
        return false;
    }
    a.hops
        .iter()
        .zip(b.hops.iter())
        .all(|(x, y)| x.hop.ip.is_none() || y.hop.ip.is_none() || x.hop.ip == y.hop.ip)
}

/// Fill timeout positions in `canonical` with responder data from `new`.
fn merge_into(canonical: &mut ClassifiedTrace, new: &ClassifiedTrace) {
    for (c, n) in canonical.hops.iter_mut().zip(new.hops.iter()) {
        if c.hop.ip.is_none() && n.hop.ip.is_some() {
            *c = n.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClassifiedHop, Hop, HopCategory};

    fn trace_from_ips(ips: &[Option<&str>]) -> ClassifiedTrace {
        let hops = ips
            .iter()
            .enumerate()
            .map(|(i, ip)| ClassifiedHop {
                hop: Hop {
                    ttl: (i + 1) as u8,
                    ip: ip.map(|s| s.parse().unwrap()),
                    rtt: ip.map(|_| Duration::from_millis(1)),
                    reached_destination: false,
                    hostname: None,
                },
                asn: None,
                as_name: None,
                category: HopCategory::Unknown,
            })
            .collect();
        ClassifiedTrace {
            destination: "x".into(),
            destination_hostname: None,
            max_hops: ips.len() as u8,
            reached: false,
            public_ip: None,
            public_ip_hostname: None,
            client_asn: None,
            client_as_name: None,
            destination_asn: None,
            destination_as_name: None,
            hops,
            duration: Duration::ZERO,
        }
    }

    #[test]
    fn paths_match_treats_timeout_as_compatible_with_any_ip() {
        let a = trace_from_ips(&[Some("1.1.1.1"), None, Some("3.3.3.3")]);
        let b = trace_from_ips(&[Some("1.1.1.1"), Some("2.2.2.2"), Some("3.3.3.3")]);
        assert!(paths_match(&a, &b));
    }

    #[test]
    fn paths_match_rejects_conflicting_ip_at_same_position() {
        let a = trace_from_ips(&[Some("1.1.1.1")]);
        let b = trace_from_ips(&[Some("9.9.9.9")]);
        assert!(!paths_match(&a, &b));
    }

    #[test]
    fn paths_match_rejects_different_lengths() {
        let a = trace_from_ips(&[Some("1.1.1.1")]);
        let b = trace_from_ips(&[Some("1.1.1.1"), Some("2.2.2.2")]);
        assert!(!paths_match(&a, &b));
    }

    #[test]
    fn merge_into_fills_only_timeout_positions() {
        let mut canonical = trace_from_ips(&[Some("1.1.1.1"), None]);
        let new = trace_from_ips(&[Some("1.1.1.1"), Some("2.2.2.2")]);
        merge_into(&mut canonical, &new);
        assert_eq!(canonical.hops[1].hop.ip, Some("2.2.2.2".parse().unwrap()));
        assert_eq!(canonical.hops[0].hop.ip, Some("1.1.1.1".parse().unwrap()));
    }

    #[test]
    fn run_assembles_unique_and_duplicate_paths_with_early_stop() {
        let engine = MultipathEngine::new();
        let base = FlowIdentifier::base(0x1111);
        let config = MultipathConfig {
            flow_variations: 10,
            max_paths: 8,
            early_stop_threshold: 2,
            timeout: Duration::from_secs(1),
            max_hops: 3,
            batch_size: 2,
        };
        let cancel = AtomicBool::new(false);
        // Every variation returns the identical trace, so the first one is
        // unique and every subsequent one is a duplicate; the sliding
        // window of size 2 should trip early-stop well before exhausting
        // all 10 variations.
        let fixed = trace_from_ips(&[Some("1.1.1.1"), Some("2.2.2.2")]);
        let topology = engine
            .run(
                "dest".into(),
                "9.9.9.9".parse().unwrap(),
                base,
                &config,
                None,
                None,
                None,
                &cancel,
                |_flow_id| Ok(fixed.clone()),
            )
            .unwrap();
        assert_eq!(topology.unique_path_count, 1);
        assert!(topology.paths.len() < 10);
        assert!(topology.paths.iter().filter(|p| p.is_unique).count() == 1);
    }
}
