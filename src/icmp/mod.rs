//! ICMPv4 Echo encode/decode (spec §4.1).

mod codec;

pub use codec::{build_echo_request, checksum, observed_ip_ttl, parse_inbound, ParsedIcmp, MAX_PACKET_SIZE};
