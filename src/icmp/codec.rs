//! ICMPv4 Echo Request encoder and inbound-message parser (spec §4.1, §6).
//!
//! The parser is exposed to raw network bytes (and, via the crate's test
//! suite, to fuzzed input) so every path here returns a value rather than
//! panicking: a malformed or irrelevant datagram becomes `ParsedIcmp::Other`,
//! never an error.

use arrayvec::ArrayVec;

/// ICMP type: Echo Reply.
const TYPE_ECHO_REPLY: u8 = 0;
/// ICMP type: Destination Unreachable.
const TYPE_DEST_UNREACHABLE: u8 = 3;
/// ICMP type: Echo Request.
const TYPE_ECHO_REQUEST: u8 = 8;
/// ICMP type: Time Exceeded.
const TYPE_TIME_EXCEEDED: u8 = 11;

/// Largest IP packet this codec will build or parse.
pub const MAX_PACKET_SIZE: usize = 1024;

/// The result of parsing one inbound datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedIcmp {
    /// An Echo Reply whose identifier matched ours.
    EchoReply { sequence: u16 },
    /// A Time Exceeded quoting one of our Echo Requests.
    TimeExceeded { sequence: u16 },
    /// A Destination Unreachable quoting one of our Echo Requests.
    DestinationUnreachable { sequence: u16 },
    /// Anything else: wrong identifier, malformed, truncated, or a message
    /// type we don't care about. Never treated as an error.
    Other,
}

impl ParsedIcmp {
    #[must_use]
    pub fn sequence(&self) -> Option<u16> {
        match self {
            Self::EchoReply { sequence }
            | Self::TimeExceeded { sequence }
            | Self::DestinationUnreachable { sequence } => Some(*sequence),
            Self::Other => None,
        }
    }
}

/// Build an ICMPv4 Echo Request datagram.
///
/// `payload_size` bytes of deterministic filler (`payload_pattern` repeated)
/// follow the 8-byte ICMP header. Checksum is computed over the full
/// message with the checksum field zeroed, per RFC 792.
#[must_use]
pub fn build_echo_request(
    identifier: u16,
    sequence: u16,
    payload_size: u16,
    payload_pattern: u8,
) -> ArrayVec<u8, MAX_PACKET_SIZE> {
    let mut buf = ArrayVec::<u8, MAX_PACKET_SIZE>::new();
    buf.push(TYPE_ECHO_REQUEST);
    buf.push(0); // code
    buf.push(0); // checksum hi (placeholder)
    buf.push(0); // checksum lo (placeholder)
    buf.extend(identifier.to_be_bytes());
    buf.extend(sequence.to_be_bytes());
    let payload_len = usize::from(payload_size).min(MAX_PACKET_SIZE - buf.len());
    for i in 0..payload_len {
        buf.push(payload_pattern.wrapping_add(i as u8));
    }
    let sum = checksum(&buf);
    let sum_bytes = sum.to_be_bytes();
    buf[2] = sum_bytes[0];
    buf[3] = sum_bytes[1];
    buf
}

/// RFC 1071 one's-complement checksum over `data`, treated as zero-padded
/// to an even length if necessary.
#[must_use]
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u32::from(u16::from_be_bytes([chunk[0], chunk[1]]));
    }
    if let [last] = *chunks.remainder() {
        sum += u32::from(last) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Parse an inbound datagram that may or may not carry a leading IPv4
/// header (platforms differ on `SOCK_DGRAM`+`IPPROTO_ICMP`), matching only
/// messages whose identifier equals `expected_identifier`.
#[must_use]
pub fn parse_inbound(buf: &[u8], expected_identifier: u16) -> ParsedIcmp {
    let icmp = match strip_outer_ipv4_header(buf) {
        Some(icmp) => icmp,
        None => return ParsedIcmp::Other,
    };
    if icmp.len() < 8 {
        return ParsedIcmp::Other;
    }
    let icmp_type = icmp[0];
    match icmp_type {
        TYPE_ECHO_REPLY => {
            let identifier = u16::from_be_bytes([icmp[4], icmp[5]]);
            let sequence = u16::from_be_bytes([icmp[6], icmp[7]]);
            if identifier == expected_identifier {
                ParsedIcmp::EchoReply { sequence }
            } else {
                ParsedIcmp::Other
            }
        }
        TYPE_TIME_EXCEEDED | TYPE_DEST_UNREACHABLE => {
            match parse_quoted_echo(&icmp[8..], expected_identifier) {
                Some(sequence) if icmp_type == TYPE_TIME_EXCEEDED => {
                    ParsedIcmp::TimeExceeded { sequence }
                }
                Some(sequence) => ParsedIcmp::DestinationUnreachable { sequence },
                None => ParsedIcmp::Other,
            }
        }
        _ => ParsedIcmp::Other,
    }
}

/// The TTL field of `buf`'s leading IPv4 header, if it has one. Platforms
/// that hand `SOCK_DGRAM`+`IPPROTO_ICMP` reads back with the outer IPv4
/// header attached let the ping engine read the responder's observed TTL
/// this way; platforms that strip it (as `parse_inbound` already tolerates)
/// simply never get a TTL observation.
#[must_use]
pub fn observed_ip_ttl(buf: &[u8]) -> Option<u8> {
    let first = *buf.first()?;
    if first >> 4 != 4 {
        return None;
    }
    buf.get(8).copied()
}

/// If `buf` starts with an IPv4 header (high nibble of the first byte is
/// 4), skip it and return the remainder; otherwise return `buf` unchanged.
/// Returns `None` if the declared header length doesn't fit in `buf`.
fn strip_outer_ipv4_header(buf: &[u8]) -> Option<&[u8]> {
    let first = *buf.first()?;
    if first >> 4 == 4 {
        let header_len = usize::from(first & 0x0F) * 4;
        if header_len < 20 || header_len > buf.len() {
            return None;
        }
        Some(&buf[header_len..])
    } else {
        Some(buf)
    }
}

/// Given the payload of a Time Exceeded / Destination Unreachable message
/// (the quoted original IPv4 header followed by the first bytes of the
/// offending Echo Request), extract its sequence number if the identifier
/// matches.
fn parse_quoted_echo(payload: &[u8], expected_identifier: u16) -> Option<u16> {
    let first = *payload.first()?;
    if first >> 4 != 4 {
        return None;
    }
    let ip_header_len = usize::from(first & 0x0F) * 4;
    if ip_header_len < 20 {
        return None;
    }
    let quoted_icmp = payload.get(ip_header_len..)?;
    if quoted_icmp.len() < 8 {
        return None;
    }
    if quoted_icmp[0] != TYPE_ECHO_REQUEST {
        return None;
    }
    let identifier = u16::from_be_bytes([quoted_icmp[4], quoted_icmp[5]]);
    let sequence = u16::from_be_bytes([quoted_icmp[6], quoted_icmp[7]]);
    (identifier == expected_identifier).then_some(sequence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn checksum_of_zero_buffer_is_all_ones() {
        let buf = [0_u8; 8];
        assert_eq!(checksum(&buf), 0xFFFF);
    }

    #[test]
    fn encode_then_parse_round_trips_echo_reply_shape() {
        // We can't parse our own Echo Request as an Echo Reply (different
        // type), but the checksum over the built request must itself
        // checksum-validate: appending the computed checksum back into the
        // message and summing again yields zero.
        let req = build_echo_request(0xBEEF, 7, 32, 0xAB);
        let mut verify = req.clone();
        // already contains the computed checksum in place; summing the
        // whole message (checksum included) must fold to zero.
        let mut sum: u32 = 0;
        for chunk in verify.chunks_exact(2) {
            sum += u32::from(u16::from_be_bytes([chunk[0], chunk[1]]));
        }
        while sum >> 16 != 0 {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }
        assert_eq!(sum as u16, 0xFFFF);
        verify.clear();
    }

    fn echo_reply_bytes(identifier: u16, sequence: u16) -> Vec<u8> {
        let mut buf = vec![0_u8; 8];
        buf[0] = TYPE_ECHO_REPLY;
        buf[4..6].copy_from_slice(&identifier.to_be_bytes());
        buf[6..8].copy_from_slice(&sequence.to_be_bytes());
        buf
    }

    #[test]
    fn echo_reply_matched_by_identifier() {
        let buf = echo_reply_bytes(42, 5);
        assert_eq!(
            parse_inbound(&buf, 42),
            ParsedIcmp::EchoReply { sequence: 5 }
        );
    }

    #[test]
    fn echo_reply_with_wrong_identifier_is_discarded() {
        let buf = echo_reply_bytes(42, 5);
        assert_eq!(parse_inbound(&buf, 99), ParsedIcmp::Other);
    }

    #[test]
    fn echo_reply_tolerates_leading_ipv4_header() {
        let mut ip_header = vec![0x45_u8]; // version 4, IHL 5 (20 bytes)
        ip_header.extend(std::iter::repeat(0).take(19));
        let mut buf = ip_header;
        buf.extend(echo_reply_bytes(7, 3));
        assert_eq!(parse_inbound(&buf, 7), ParsedIcmp::EchoReply { sequence: 3 });
    }

    fn time_exceeded_bytes(identifier: u16, sequence: u16) -> Vec<u8> {
        let mut outer = vec![0_u8; 8];
        outer[0] = TYPE_TIME_EXCEEDED;
        let mut quoted_ip = vec![0x45_u8];
        quoted_ip.extend(std::iter::repeat(0).take(19));
        let mut quoted_echo = vec![0_u8; 8];
        quoted_echo[0] = TYPE_ECHO_REQUEST;
        quoted_echo[4..6].copy_from_slice(&identifier.to_be_bytes());
        quoted_echo[6..8].copy_from_slice(&sequence.to_be_bytes());
        outer.extend(quoted_ip);
        outer.extend(quoted_echo);
        outer
    }

    #[test]
    fn time_exceeded_extracts_quoted_sequence() {
        let buf = time_exceeded_bytes(11, 9);
        assert_eq!(
            parse_inbound(&buf, 11),
            ParsedIcmp::TimeExceeded { sequence: 9 }
        );
    }

    #[test_case(&[] ; "empty buffer")]
    #[test_case(&[0; 7] ; "seven byte buffer, too short for an icmp header")]
    fn malformed_input_never_panics_and_is_ignored(buf: &[u8]) {
        assert_eq!(parse_inbound(buf, 1), ParsedIcmp::Other);
    }

    #[test]
    fn time_exceeded_with_correct_identifier_but_wrong_sequence_still_recorded() {
        // E5: correct identifier, wrong sequence -> "record for the embedded
        // sequence", i.e. it parses, just with that (wrong-looking)
        // sequence; it is the caller's job to decide it doesn't match an
        // outstanding probe.
        let buf = time_exceeded_bytes(11, 250);
        assert_eq!(
            parse_inbound(&buf, 11),
            ParsedIcmp::TimeExceeded { sequence: 250 }
        );
    }

    #[test]
    fn observed_ip_ttl_reads_header_byte_when_present() {
        let mut buf = vec![0x45_u8, 0, 0, 0, 0, 0, 0, 0, 58];
        buf.extend(std::iter::repeat(0).take(11));
        assert_eq!(observed_ip_ttl(&buf), Some(58));
    }

    #[test]
    fn observed_ip_ttl_is_none_without_leading_ipv4_header() {
        let buf = echo_reply_bytes(1, 1);
        assert_eq!(observed_ip_ttl(&buf), None);
    }

    #[test]
    fn fuzzed_bytes_never_panic() {
        use rand::RngCore;
        let mut rng = rand::thread_rng();
        let mut buf = [0_u8; 64];
        for _ in 0..1000 {
            rng.fill_bytes(&mut buf);
            let _ = parse_inbound(&buf, 0x1234);
        }
    }
}
