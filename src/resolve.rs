//! Hostname-to-IPv4 resolution (spec §4.3).

use crate::error::{NetpathError, NetpathResult};
use std::net::Ipv4Addr;
use std::str::FromStr;
use trust_dns_resolver::Resolver;

/// Resolve `host` to a single IPv4 address.
///
/// If `host` parses as a dotted-quad it is returned directly without
/// touching the network (the "numeric fast-path" of spec §4.3). Otherwise
/// an A-record lookup is performed via `resolver`; the first IPv4 answer
/// wins. Fails with `ResolutionFailed` if no IPv4 answer is returned.
pub fn resolve_ipv4(resolver: &Resolver, host: &str) -> NetpathResult<Ipv4Addr> {
    if let Ok(ip) = Ipv4Addr::from_str(host) {
        return Ok(ip);
    }
    let response = resolver.ipv4_lookup(host).map_err(|e| NetpathError::ResolutionFailed {
        host: host.to_string(),
        detail: e.to_string(),
    })?;
    response
        .iter()
        .next()
        .map(|a| Ipv4Addr::from(*a))
        .ok_or_else(|| NetpathError::ResolutionFailed {
            host: host.to_string(),
            detail: "no IPv4 address in DNS response".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_host_is_returned_without_dns() {
        // A resolver pointed at an address that refuses connections would
        // make this test hang/fail if the numeric fast-path were not taken;
        // instead it must never be consulted.
        let resolver = Resolver::new(
            trust_dns_resolver::config::ResolverConfig::default(),
            trust_dns_resolver::config::ResolverOpts::default(),
        )
        .expect("resolver construction is infallible for a static config");
        let ip = resolve_ipv4(&resolver, "192.0.2.1").unwrap();
        assert_eq!(ip, Ipv4Addr::new(192, 0, 2, 1));
    }
}
