//! Concurrent ICMP ping session (spec §4.8).

use crate::clock::{MonoClock, MonoInstant};
use crate::error::{NetpathError, NetpathResult};
use crate::icmp::{build_echo_request, observed_ip_ttl, parse_inbound, ParsedIcmp, MAX_PACKET_SIZE};
use crate::net::readiness::{wait_readable, WaitOutcome};
use crate::net::{BindConfig, IcmpSocket};
use crate::types::{PingResponse, PingResult, PingStatistics};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::time::{Duration, SystemTime};

/// Per-session ping configuration.
#[derive(Debug, Clone)]
pub struct PingConfig {
    pub count: u32,
    pub interval: Duration,
    pub timeout: Duration,
    pub payload_size: u16,
    pub payload_pattern: u8,
    pub bind: BindConfig,
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            count: 4,
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(2),
            payload_size: 56,
            payload_pattern: 0,
            bind: BindConfig::default(),
        }
    }
}

/// Runs one ping session on one socket. Each `PingEngine` owns a
/// process-unique 16-bit identifier so two concurrent sessions sharing a
/// machine never confuse each other's replies (spec §4.8).
pub struct PingEngine {
    clock: MonoClock,
    identifier: u16,
}

impl Default for PingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PingEngine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            clock: MonoClock::new(),
            identifier: next_session_identifier(),
        }
    }

    pub fn run(&self, target: Ipv4Addr, config: &PingConfig, cancel: &AtomicBool) -> NetpathResult<PingResult> {
        log::debug!("pinging {target}, count={}, interval={:?}", config.count, config.interval);
        let socket = IcmpSocket::create(&config.bind)?;
        let count = config.count;
        let start = self.clock.now();
        let overall_deadline = start + config.interval * count.saturating_sub(1) + config.timeout;

        let mut sent_at: Vec<Option<MonoInstant>> = vec![None; count as usize];
        let mut received_at: Vec<Option<MonoInstant>> = vec![None; count as usize];
        let mut observed_ttl: Vec<Option<u8>> = vec![None; count as usize];
        let mut next_seq: u32 = 1;
        let mut replied: u32 = 0;
        let mut buf = [0_u8; MAX_PACKET_SIZE];

        loop {
            if cancel.load(Ordering::Relaxed) {
                return Err(NetpathError::Cancelled);
            }
            if replied >= count {
                break;
            }
            let now = self.clock.now();
            if now >= overall_deadline {
                break;
            }

            if next_seq <= count {
                let scheduled = start + config.interval * (next_seq - 1);
                if now >= scheduled {
                    let packet = build_echo_request(self.identifier, next_seq as u16, config.payload_size, config.payload_pattern);
                    socket.send_to(&packet, target)?;
                    sent_at[(next_seq - 1) as usize] = Some(self.clock.now());
                    next_seq += 1;
                    continue;
                }
                let wake_at = scheduled.min(overall_deadline);
                self.wait_and_process(
                    &socket,
                    wake_at,
                    cancel,
                    target,
                    &mut buf,
                    &mut sent_at,
                    &mut received_at,
                    &mut observed_ttl,
                    &mut replied,
                )?;
            } else {
                self.wait_and_process(
                    &socket,
                    overall_deadline,
                    cancel,
                    target,
                    &mut buf,
                    &mut sent_at,
                    &mut received_at,
                    &mut observed_ttl,
                    &mut replied,
                )?;
            }
        }

        let responses: Vec<PingResponse> = (1..=count)
            .map(|seq| {
                let idx = (seq - 1) as usize;
                let rtt = match (sent_at[idx], received_at[idx]) {
                    (Some(s), Some(r)) => Some(r.since(s)),
                    _ => None,
                };
                PingResponse {
                    sequence: seq,
                    rtt,
                    ttl_observed: observed_ttl[idx],
                    timestamp: SystemTime::now(),
                }
            })
            .collect();

        let statistics = PingStatistics::compute(count, &responses);
        log::trace!("ping to {target} finished: loss={:.2}", statistics.packet_loss);
        Ok(PingResult {
            target: target.to_string(),
            responses,
            statistics,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn wait_and_process(
        &self,
        socket: &IcmpSocket,
        wake_at: MonoInstant,
        cancel: &AtomicBool,
        target: Ipv4Addr,
        buf: &mut [u8],
        sent_at: &mut [Option<MonoInstant>],
        received_at: &mut [Option<MonoInstant>],
        observed_ttl: &mut [Option<u8>],
        replied: &mut u32,
    ) -> NetpathResult<()> {
        match wait_readable(socket.raw(), &self.clock, wake_at, cancel) {
            WaitOutcome::Cancelled => Err(NetpathError::Cancelled),
            WaitOutcome::TimedOut => Ok(()),
            WaitOutcome::Readable => {
                let Ok((len, IpAddr::V4(from))) = socket.recv_from(buf) else {
                    return Ok(());
                };
                if from != target {
                    return Ok(());
                }
                let recv_time = self.clock.now();
                let ttl = observed_ip_ttl(&buf[..len]);
                match parse_inbound(&buf[..len], self.identifier) {
                    ParsedIcmp::EchoReply { sequence } => {
                        if let Some(idx) = index_for(sequence, sent_at.len()) {
                            if received_at[idx].is_none() {
                                received_at[idx] = Some(recv_time);
                                observed_ttl[idx] = ttl;
                                *replied += 1;
                            }
                        }
                    }
                    ParsedIcmp::TimeExceeded { sequence } | ParsedIcmp::DestinationUnreachable { sequence } => {
                        if let Some(idx) = index_for(sequence, sent_at.len()) {
                            if observed_ttl[idx].is_none() {
                                observed_ttl[idx] = ttl;
                            }
                        }
                    }
                    ParsedIcmp::Other => {}
                }
                Ok(())
            }
        }
    }
}

fn index_for(sequence: u16, len: usize) -> Option<usize> {
    let idx = usize::from(sequence).checked_sub(1)?;
    (idx < len).then_some(idx)
}

fn next_session_identifier() -> u16 {
    static COUNTER: AtomicU16 = AtomicU16::new(0);
    let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
    counter ^ (std::process::id() as u16)
}
