//! RFC 5389 STUN Binding Request/Response, the minimum subset needed for
//! public-IPv4 discovery (spec §4.4, §6).

use rand::RngCore;
use std::net::Ipv4Addr;

const MAGIC_COOKIE: u32 = 0x2112_A442;
const BINDING_REQUEST: u16 = 0x0001;
const BINDING_SUCCESS_RESPONSE: u16 = 0x0101;
const ATTR_MAPPED_ADDRESS: u16 = 0x0001;
const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;
const ADDRESS_FAMILY_IPV4: u8 = 0x01;

/// Build a 20-byte STUN Binding Request with no attributes: a 2-byte type,
/// 2-byte length (zero), the fixed magic cookie, and 12 random transaction
/// bytes.
#[must_use]
pub fn build_binding_request() -> [u8; 20] {
    let mut buf = [0_u8; 20];
    buf[0..2].copy_from_slice(&BINDING_REQUEST.to_be_bytes());
    buf[2..4].copy_from_slice(&0_u16.to_be_bytes());
    buf[4..8].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
    rand::thread_rng().fill_bytes(&mut buf[8..20]);
    buf
}

/// Parse a STUN Binding Response, returning the reflexive IPv4 address if
/// present. Prefers XOR-MAPPED-ADDRESS (0x0020); falls back to
/// MAPPED-ADDRESS (0x0001) if that's all the server sent.
#[must_use]
pub fn parse_binding_response(buf: &[u8]) -> Option<Ipv4Addr> {
    if buf.len() < 20 {
        return None;
    }
    let msg_type = u16::from_be_bytes([buf[0], buf[1]]);
    if msg_type != BINDING_SUCCESS_RESPONSE {
        return None;
    }
    let msg_len = usize::from(u16::from_be_bytes([buf[2], buf[3]]));
    let attrs_end = (20 + msg_len).min(buf.len());
    let mut mapped = None;
    let mut xor_mapped = None;
    let mut offset = 20;
    while offset + 4 <= attrs_end {
        let attr_type = u16::from_be_bytes([buf[offset], buf[offset + 1]]);
        let attr_len = usize::from(u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]));
        let value_start = offset + 4;
        let value_end = value_start + attr_len;
        if value_end > attrs_end || value_end > buf.len() {
            break;
        }
        let value = &buf[value_start..value_end];
        match attr_type {
            ATTR_MAPPED_ADDRESS => mapped = parse_mapped_address(value),
            ATTR_XOR_MAPPED_ADDRESS => xor_mapped = parse_xor_mapped_address(value),
            _ => {}
        }
        // Attributes are padded to a 4-byte boundary.
        let padded_len = (attr_len + 3) & !3;
        offset = value_start + padded_len;
    }
    xor_mapped.or(mapped)
}

fn parse_mapped_address(value: &[u8]) -> Option<Ipv4Addr> {
    if value.len() < 8 || value[1] != ADDRESS_FAMILY_IPV4 {
        return None;
    }
    Some(Ipv4Addr::new(value[4], value[5], value[6], value[7]))
}

fn parse_xor_mapped_address(value: &[u8]) -> Option<Ipv4Addr> {
    if value.len() < 8 || value[1] != ADDRESS_FAMILY_IPV4 {
        return None;
    }
    let cookie = MAGIC_COOKIE.to_be_bytes();
    let octets = [
        value[4] ^ cookie[0],
        value[5] ^ cookie[1],
        value[6] ^ cookie[2],
        value[7] ^ cookie[3],
    ];
    Some(Ipv4Addr::from(octets))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_response_with(attr_type: u16, ip: Ipv4Addr) -> Vec<u8> {
        let mut attr_value = vec![0_u8, ADDRESS_FAMILY_IPV4, 0, 0];
        if attr_type == ATTR_XOR_MAPPED_ADDRESS {
            let cookie = MAGIC_COOKIE.to_be_bytes();
            for (i, octet) in ip.octets().iter().enumerate() {
                attr_value.push(octet ^ cookie[i]);
            }
        } else {
            attr_value.extend(ip.octets());
        }
        let mut buf = vec![0_u8; 20];
        buf[0..2].copy_from_slice(&BINDING_SUCCESS_RESPONSE.to_be_bytes());
        buf[4..8].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
        buf.extend((attr_type).to_be_bytes());
        buf.extend((attr_value.len() as u16).to_be_bytes());
        buf.extend(&attr_value);
        let msg_len = (buf.len() - 20) as u16;
        buf[2..4].copy_from_slice(&msg_len.to_be_bytes());
        buf
    }

    #[test]
    fn request_has_correct_header_shape() {
        let req = build_binding_request();
        assert_eq!(&req[0..2], &BINDING_REQUEST.to_be_bytes());
        assert_eq!(&req[2..4], &0_u16.to_be_bytes());
        assert_eq!(&req[4..8], &MAGIC_COOKIE.to_be_bytes());
    }

    #[test]
    fn prefers_xor_mapped_address() {
        let ip = Ipv4Addr::new(203, 0, 113, 7);
        let buf = build_response_with(ATTR_XOR_MAPPED_ADDRESS, ip);
        assert_eq!(parse_binding_response(&buf), Some(ip));
    }

    #[test]
    fn falls_back_to_mapped_address() {
        let ip = Ipv4Addr::new(198, 51, 100, 9);
        let buf = build_response_with(ATTR_MAPPED_ADDRESS, ip);
        assert_eq!(parse_binding_response(&buf), Some(ip));
    }

    #[test]
    fn truncated_response_does_not_panic() {
        assert_eq!(parse_binding_response(&[0_u8; 3]), None);
    }
}
