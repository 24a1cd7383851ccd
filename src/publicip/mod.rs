//! Tiered public-IPv4 discovery: STUN first, DNS TXT fallback (spec §4.4).

mod stun;

use parking_lot::Mutex;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;
use trust_dns_resolver::Resolver;

/// Per-STUN-server timeout, within the 0.8-1.0s band spec §4.4 allows.
const STUN_SERVER_TIMEOUT: Duration = Duration::from_millis(900);

/// Well-known public STUN servers, tried in order until one answers (spec
/// §4.4, §6).
pub const DEFAULT_STUN_SERVERS: &[(&str, u16)] = &[
    ("stun.l.google.com", 19302),
    ("stun1.l.google.com", 19302),
    ("stun.cloudflare.com", 3478),
];

/// DNS "whoami" service queried as a last resort (spec §4.4).
pub const DEFAULT_WHOAMI_HOST: &str = "whoami.ds.akahelp.net";

/// Tiered public-IP discovery with a single cached result (spec §4.4,
/// §4.11). Shared across facade operations; the cache is a single value
/// protected against concurrent update, last-writer-wins on races.
pub struct PublicIpDiscovery {
    stun_servers: Vec<(String, u16)>,
    whoami_host: String,
    pub(crate) cache: Mutex<Option<Ipv4Addr>>,
}

impl PublicIpDiscovery {
    #[must_use]
    pub fn new() -> Self {
        Self {
            stun_servers: DEFAULT_STUN_SERVERS
                .iter()
                .map(|(h, p)| ((*h).to_string(), *p))
                .collect(),
            whoami_host: DEFAULT_WHOAMI_HOST.to_string(),
            cache: Mutex::new(None),
        }
    }

    /// Return the cached public IP if present, otherwise run discovery and
    /// cache the result (spec §4.4: "cached until invalidated").
    pub fn get_or_discover(&self, resolver: &Resolver) -> Option<Ipv4Addr> {
        if let Some(ip) = *self.cache.lock() {
            return Some(ip);
        }
        let discovered = self.discover(resolver);
        if let Some(ip) = discovered {
            *self.cache.lock() = Some(ip);
        }
        discovered
    }

    /// Force an explicit value into the cache (the `public_ip` config
    /// override, spec §6, which skips discovery entirely).
    pub fn set_override(&self, ip: Ipv4Addr) {
        *self.cache.lock() = Some(ip);
    }

    /// Drop the cached value (invoked by `network_changed`, spec §4.11).
    pub fn invalidate(&self) {
        *self.cache.lock() = None;
    }

    /// Run the full tiered discovery without consulting or updating the
    /// cache.
    #[must_use]
    pub fn discover(&self, resolver: &Resolver) -> Option<Ipv4Addr> {
        self.discover_via_stun().or_else(|| self.discover_via_dns(resolver))
    }

    fn discover_via_stun(&self) -> Option<Ipv4Addr> {
        for (host, port) in &self.stun_servers {
            if let Some(ip) = query_stun_server(host, *port) {
                return Some(ip);
            }
        }
        None
    }

    fn discover_via_dns(&self, resolver: &Resolver) -> Option<Ipv4Addr> {
        let response = resolver.txt_lookup(&self.whoami_host).ok()?;
        for record in response.iter() {
            // A single TXT RR may carry its marker and value as separate
            // character-strings (e.g. "ip" then "203.0.113.5"); join them
            // with a space before scanning so both that layout and a single
            // combined string ("ip=203.0.113.5") resolve.
            let text = record
                .iter()
                .map(|chars| String::from_utf8_lossy(chars).into_owned())
                .collect::<Vec<_>>()
                .join(" ");
            if let Some(ip) = extract_ip_field(&text) {
                return Some(ip);
            }
        }
        None
    }
}

impl Default for PublicIpDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

fn query_stun_server(host: &str, port: u16) -> Option<Ipv4Addr> {
    let addr = (host, port).to_socket_addrs_first()?;
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.set_read_timeout(Some(STUN_SERVER_TIMEOUT)).ok()?;
    socket.connect(addr).ok()?;
    let request = stun::build_binding_request();
    socket.send(&request).ok()?;
    let mut buf = [0_u8; 512];
    let len = socket.recv(&mut buf).ok()?;
    stun::parse_binding_response(&buf[..len])
}

/// Tiny local trait to avoid pulling in an extra resolver round-trip: we
/// only need the first resolved socket address for a `(host, port)` STUN
/// server entry.
trait FirstSocketAddr {
    fn to_socket_addrs_first(&self) -> Option<SocketAddr>;
}

impl FirstSocketAddr for (&str, u16) {
    fn to_socket_addrs_first(&self) -> Option<SocketAddr> {
        use std::net::ToSocketAddrs;
        self.to_socket_addrs().ok()?.next()
    }
}

/// Extract the IPv4 address from a Team-Cymru-style `ip`-prefixed TXT
/// field (spec §4.4: "the field whose leading marker is `ip`"), tolerating
/// both a single combined field (`ip=203.0.113.5`) and a bare `ip` marker
/// followed by the address as its own field/character-string.
fn extract_ip_field(text: &str) -> Option<Ipv4Addr> {
    let fields: Vec<&str> = text
        .split(|c: char| c.is_whitespace() || c == ',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .collect();
    for (i, field) in fields.iter().enumerate() {
        if field.eq_ignore_ascii_case("ip") {
            if let Some(next) = fields.get(i + 1) {
                if let Ok(ip) = next.parse::<Ipv4Addr>() {
                    return Some(ip);
                }
            }
            continue;
        }
        if field.len() < 3 {
            continue;
        }
        if field[..2].eq_ignore_ascii_case("ip") {
            let rest = field[2..].trim_start_matches(['=', ':']);
            if let Ok(ip) = rest.parse::<Ipv4Addr>() {
                return Some(ip);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_ip_marker_field() {
        assert_eq!(
            extract_ip_field("ip=203.0.113.9 port=1234"),
            Some(Ipv4Addr::new(203, 0, 113, 9))
        );
    }

    #[test]
    fn ignores_fields_without_ip_marker() {
        assert_eq!(extract_ip_field("port=1234 proto=udp"), None);
    }

    #[test]
    fn extracts_ip_from_bare_marker_and_adjacent_value() {
        // akahelp's TXT record carries "ip" and the address as separate
        // character-strings, joined with a space before reaching here.
        assert_eq!(
            extract_ip_field("ip 203.0.113.5"),
            Some(Ipv4Addr::new(203, 0, 113, 5))
        );
    }

    #[test]
    fn cache_persists_until_invalidated() {
        let discovery = PublicIpDiscovery::new();
        discovery.set_override(Ipv4Addr::new(9, 9, 9, 9));
        assert_eq!(*discovery.cache.lock(), Some(Ipv4Addr::new(9, 9, 9, 9)));
        discovery.invalidate();
        assert_eq!(*discovery.cache.lock(), None);
    }
}
