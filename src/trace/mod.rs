//! Single-socket parallel TTL sweep traceroute (spec §4.7).

pub mod stream;

use crate::clock::{MonoClock, MonoInstant};
use crate::error::NetpathResult;
use crate::icmp::{build_echo_request, parse_inbound, ParsedIcmp, MAX_PACKET_SIZE};
use crate::net::readiness::{wait_readable, WaitOutcome};
use crate::net::{BindConfig, IcmpSocket};
use crate::types::{FlowIdentifier, Hop, TraceResult};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub use stream::{StreamEvent, StreamingTraceConfig};

/// Per-operation configuration for one `TracerouteEngine::run` call (spec
/// §4.11: operation override, else facade default).
#[derive(Debug, Clone)]
pub struct TraceConfig {
    pub max_hops: u8,
    pub timeout: Duration,
    pub payload_size: u16,
    pub payload_pattern: u8,
    pub bind: BindConfig,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            max_hops: 30,
            timeout: Duration::from_secs(3),
            payload_size: 56,
            payload_pattern: 0,
            bind: BindConfig::default(),
        }
    }
}

/// Performs one traceroute per `run` call, owning its socket for the
/// duration of the call and closing it on every exit path (spec §5).
pub struct TracerouteEngine {
    clock: MonoClock,
}

impl Default for TracerouteEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TracerouteEngine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            clock: MonoClock::new(),
        }
    }

    /// Run one traceroute toward `dest` using `flow_id` as the Echo Request
    /// identifier, blocking until the result is ready.
    pub fn run(
        &self,
        dest: Ipv4Addr,
        flow_id: FlowIdentifier,
        config: &TraceConfig,
        cancel: &AtomicBool,
    ) -> NetpathResult<TraceResult> {
        log::debug!("tracing {dest} with flow {flow_id}, max_hops={}", config.max_hops);
        let start = self.clock.now();
        let socket = IcmpSocket::create(&config.bind)?;
        let max_hops = config.max_hops;
        let mut hops: Vec<Option<Hop>> = vec![None; usize::from(max_hops)];
        let mut sent_at: Vec<Option<MonoInstant>> = vec![None; usize::from(max_hops)];

        for ttl in 1..=max_hops {
            socket.set_ttl(ttl)?;
            let packet = build_echo_request(flow_id.icmp_id, u16::from(ttl), config.payload_size, config.payload_pattern);
            socket.send_to(&packet, dest)?;
            sent_at[index_of(ttl)] = Some(self.clock.now());
        }

        let deadline = self.clock.now() + config.timeout;
        let mut destination_ttl: Option<u8> = None;
        let mut buf = [0_u8; MAX_PACKET_SIZE];

        loop {
            if cancel.load(Ordering::Relaxed) {
                return Err(crate::error::NetpathError::Cancelled);
            }
            if let Some(d) = destination_ttl {
                if all_ttls_accounted_for(&hops, d) {
                    break;
                }
            }
            match wait_readable(socket.raw(), &self.clock, deadline, cancel) {
                WaitOutcome::Cancelled => return Err(crate::error::NetpathError::Cancelled),
                WaitOutcome::TimedOut => break,
                WaitOutcome::Readable => {
                    let Ok((len, IpAddr::V4(from))) = socket.recv_from(&mut buf) else {
                        continue;
                    };
                    let recv_time = self.clock.now();
                    record_reply(
                        &mut hops,
                        &sent_at,
                        parse_inbound(&buf[..len], flow_id.icmp_id),
                        from,
                        dest,
                        recv_time,
                        max_hops,
                        &mut destination_ttl,
                    );
                }
            }
        }

        let reached_ttl = destination_ttl.unwrap_or(max_hops);
        let result_len = reached_ttl.min(max_hops);
        let mut result_hops = Vec::with_capacity(usize::from(result_len));
        for ttl in 1..=result_len {
            result_hops.push(hops[index_of(ttl)].take().unwrap_or_else(|| Hop::timeout(ttl)));
        }
        log::trace!("trace to {dest} finished: reached={}, hops={}", destination_ttl.is_some(), result_hops.len());

        Ok(TraceResult {
            destination: dest.to_string(),
            max_hops,
            reached: destination_ttl.is_some(),
            hops: result_hops,
            duration: self.clock.now().since(start),
        })
    }
}

fn index_of(ttl: u8) -> usize {
    usize::from(ttl) - 1
}

/// True once every TTL strictly before `destination_ttl` has either been
/// recorded or its `Option` slot still empty but the deadline (checked by
/// the caller) has already been reached — the caller only invokes this
/// while inside the deadline loop, so "recorded" is the only condition
/// checked here; the deadline itself ends the loop on its own branch.
fn all_ttls_accounted_for(hops: &[Option<Hop>], destination_ttl: u8) -> bool {
    (1..destination_ttl).all(|ttl| hops[index_of(ttl)].is_some())
}

/// Update `hops`/`destination_ttl` for one parsed inbound datagram. Shared
/// by the blocking and streaming engines so the matching rules (sequence
/// bounds-check, first-reply-wins, destination-ttl tracking) stay in one
/// place.
#[allow(clippy::too_many_arguments)]
pub(crate) fn record_reply(
    hops: &mut [Option<Hop>],
    sent_at: &[Option<MonoInstant>],
    parsed: ParsedIcmp,
    from: Ipv4Addr,
    dest: Ipv4Addr,
    recv_time: MonoInstant,
    max_hops: u8,
    destination_ttl: &mut Option<u8>,
) -> Option<Hop> {
    let (ttl, reached) = match parsed {
        ParsedIcmp::EchoReply { sequence } => (sequence, from == dest),
        ParsedIcmp::TimeExceeded { sequence } | ParsedIcmp::DestinationUnreachable { sequence } => (sequence, false),
        ParsedIcmp::Other => return None,
    };
    if ttl == 0 || ttl > u16::from(max_hops) {
        return None;
    }
    let ttl = ttl as u8;
    let idx = index_of(ttl);
    if hops[idx].is_some() {
        return None;
    }
    let rtt = sent_at[idx].map(|s| recv_time.since(s));
    let hop = Hop {
        ttl,
        ip: Some(from),
        rtt,
        reached_destination: reached,
        hostname: None,
    };
    hops[idx] = Some(hop.clone());
    if reached {
        *destination_ttl = Some(destination_ttl.map_or(ttl, |d| d.min(ttl)));
    }
    Some(hop)
}
