//! Arrival-order streaming variant of [`super::TracerouteEngine`] with a
//! retry phase (spec §4.7 "Streaming variant").

use super::{index_of, record_reply, TraceConfig};
use crate::clock::MonoClock;
use crate::error::NetpathResult;
use crate::icmp::{build_echo_request, parse_inbound, MAX_PACKET_SIZE};
use crate::net::readiness::{wait_readable, WaitOutcome};
use crate::net::IcmpSocket;
use crate::types::{FlowIdentifier, Hop};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Extends [`TraceConfig`] with the streaming variant's retry phase.
#[derive(Debug, Clone)]
pub struct StreamingTraceConfig {
    pub trace: TraceConfig,
    /// Delay after which unanswered TTLs before the destination's TTL are
    /// re-probed once.
    pub retry_after: Duration,
}

/// One item delivered through the streaming channel, in arrival order.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Hop(Hop),
    /// The stream has no more hops to deliver; always the final event.
    Done,
}

/// Start a streaming traceroute toward `dest`. Socket setup and the initial
/// probe sends happen synchronously so fatal errors (spec §4.7 "Failure
/// semantics") surface to the caller before any background thread starts;
/// everything after that runs on a dedicated thread that owns the socket
/// until the stream ends.
pub fn stream(
    dest: Ipv4Addr,
    flow_id: FlowIdentifier,
    config: StreamingTraceConfig,
    cancel: Arc<AtomicBool>,
) -> NetpathResult<crossbeam::channel::Receiver<StreamEvent>> {
    let socket = IcmpSocket::create(&config.trace.bind)?;
    let clock = MonoClock::new();
    let max_hops = config.trace.max_hops;

    let mut sent_at = vec![None; usize::from(max_hops)];
    for ttl in 1..=max_hops {
        socket.set_ttl(ttl)?;
        let packet = build_echo_request(
            flow_id.icmp_id,
            u16::from(ttl),
            config.trace.payload_size,
            config.trace.payload_pattern,
        );
        socket.send_to(&packet, dest)?;
        sent_at[index_of(ttl)] = Some(clock.now());
    }

    let (tx, rx) = crossbeam::channel::bounded(usize::from(max_hops).max(1) + 4);
    std::thread::spawn(move || {
        run_stream_loop(socket, clock, dest, flow_id, config, &cancel, sent_at, &tx);
    });
    Ok(rx)
}

#[allow(clippy::too_many_arguments)]
fn run_stream_loop(
    socket: IcmpSocket,
    clock: MonoClock,
    dest: Ipv4Addr,
    flow_id: FlowIdentifier,
    config: StreamingTraceConfig,
    cancel: &AtomicBool,
    mut sent_at: Vec<Option<crate::clock::MonoInstant>>,
    tx: &crossbeam::channel::Sender<StreamEvent>,
) {
    let max_hops = config.trace.max_hops;
    let start = clock.now();
    let deadline = start + config.trace.timeout;
    let retry_deadline = start + config.retry_after;
    let mut hops: Vec<Option<Hop>> = vec![None; usize::from(max_hops)];
    let mut retried = vec![false; usize::from(max_hops)];
    let mut destination_ttl: Option<u8> = None;
    let mut retry_done = false;
    let mut buf = [0_u8; MAX_PACKET_SIZE];

    loop {
        if cancel.load(Ordering::Relaxed) {
            return;
        }
        if let Some(d) = destination_ttl {
            if super::all_ttls_accounted_for(&hops, d) {
                break;
            }
        }
        let now = clock.now();
        if !retry_done && now >= retry_deadline {
            retry_done = true;
            if let Some(d) = destination_ttl {
                for ttl in ttls_needing_retry(&hops, &retried, d) {
                    if socket.set_ttl(ttl).is_err() {
                        continue;
                    }
                    let packet = build_echo_request(
                        flow_id.icmp_id,
                        u16::from(ttl),
                        config.trace.payload_size,
                        config.trace.payload_pattern,
                    );
                    if socket.send_to(&packet, dest).is_ok() {
                        sent_at[index_of(ttl)] = Some(clock.now());
                        retried[index_of(ttl)] = true;
                    }
                }
            }
        }

        match wait_readable(socket.raw(), &clock, deadline, cancel) {
            WaitOutcome::Cancelled => return,
            WaitOutcome::TimedOut => break,
            WaitOutcome::Readable => {
                let Ok((len, IpAddr::V4(from))) = socket.recv_from(&mut buf) else {
                    continue;
                };
                let recv_time = clock.now();
                let parsed = parse_inbound(&buf[..len], flow_id.icmp_id);
                if let Some(hop) = record_reply(&mut hops, &sent_at, parsed, from, dest, recv_time, max_hops, &mut destination_ttl) {
                    if tx.send(StreamEvent::Hop(hop)).is_err() {
                        return;
                    }
                }
            }
        }
    }

    let reached_ttl = destination_ttl.unwrap_or(max_hops);
    for ttl in 1..=reached_ttl.min(max_hops) {
        if hops[index_of(ttl)].is_none() && tx.send(StreamEvent::Hop(Hop::timeout(ttl))).is_err() {
            return;
        }
    }
    let _ = tx.send(StreamEvent::Done);
}

/// TTLs strictly before `destination_ttl` that are still unanswered and
/// have not already been retried once.
fn ttls_needing_retry(hops: &[Option<Hop>], retried: &[bool], destination_ttl: u8) -> Vec<u8> {
    (1..destination_ttl)
        .filter(|&ttl| hops[index_of(ttl)].is_none() && !retried[index_of(ttl)])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_targets_only_unanswered_ttls_before_destination() {
        let hops: Vec<Option<Hop>> = vec![
            None,
            Some(Hop {
                ttl: 2,
                ip: Some(Ipv4Addr::new(1, 1, 1, 1)),
                rtt: Some(Duration::from_millis(1)),
                reached_destination: false,
                hostname: None,
            }),
            None,
            None,
        ];
        let retried = vec![false, false, false, false];
        assert_eq!(ttls_needing_retry(&hops, &retried, 4), vec![1, 3]);
    }

    #[test]
    fn retry_skips_ttls_already_retried_once() {
        let hops: Vec<Option<Hop>> = vec![None, None];
        let retried = vec![true, false];
        assert_eq!(ttls_needing_retry(&hops, &retried, 3), vec![2]);
    }

    #[test]
    fn retry_ignores_ttls_at_or_past_destination() {
        let hops: Vec<Option<Hop>> = vec![None, None, None];
        let retried = vec![false, false, false];
        assert_eq!(ttls_needing_retry(&hops, &retried, 2), vec![1]);
    }
}
