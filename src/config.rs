//! The facade's configuration surface and operation → facade →
//! system-default resolution order (spec §6 "Configuration surface").
//!
//! Every field here round-trips through `serde`/`toml` (an optional config
//! file), mirroring the teacher's layered config approach; duration-valued
//! CLI flags are parsed with `humantime` in the binary only (spec §B.3) —
//! everywhere in this library durations are plain millisecond integers so
//! the type stays `Deserialize` without a custom visitor.

use crate::error::{NetpathError, NetpathResult};
use crate::multipath::MultipathConfig;
use crate::net::BindConfig;
use crate::ping::PingConfig;
use crate::trace::TraceConfig;
use crate::trace::StreamingTraceConfig;
use etcetera::BaseStrategy;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound on `payload_size` (spec §4.1, shared with the codec's
/// `MAX_PACKET_SIZE`).
pub const MAX_PAYLOAD_SIZE: u16 = 1024;

/// Facade-level defaults (spec §6). An operation-level override always
/// wins; an unset override field falls through to these.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct FacadeConfig {
    pub max_hops: u8,
    pub max_wait_ms: u64,
    pub payload_size: u16,
    pub payload_pattern: u8,
    pub public_ip: Option<Ipv4Addr>,
    pub enable_logging: bool,
    pub no_reverse_dns: bool,
    pub rdns_cache_ttl_ms: u64,
    pub rdns_cache_size: usize,
    pub interface: Option<String>,
    pub source_ip: Option<Ipv4Addr>,
    pub ping_count: u32,
    pub ping_interval_ms: u64,
    pub asn_lookup_timeout_ms: u64,
    pub flow_variations: u32,
    pub max_paths: usize,
    pub early_stop_threshold: usize,
    pub retry_after_ms: u64,
}

impl Default for FacadeConfig {
    fn default() -> Self {
        Self {
            max_hops: 30,
            max_wait_ms: 1000,
            payload_size: 56,
            payload_pattern: 0,
            public_ip: None,
            enable_logging: false,
            no_reverse_dns: false,
            rdns_cache_ttl_ms: 300_000,
            rdns_cache_size: 4096,
            interface: None,
            source_ip: None,
            ping_count: 4,
            ping_interval_ms: 1000,
            asn_lookup_timeout_ms: 3000,
            flow_variations: 20,
            max_paths: 8,
            early_stop_threshold: 5,
            retry_after_ms: 1500,
        }
    }
}

impl FacadeConfig {
    /// Reject values that are structurally impossible to honour, mirroring
    /// the teacher's `validate_*` family in spirit (range checks surfaced
    /// as one named error rather than a panic downstream).
    pub fn validate(&self) -> NetpathResult<()> {
        if self.max_hops == 0 {
            return Err(invalid("max_hops must be greater than zero"));
        }
        if self.payload_size > MAX_PAYLOAD_SIZE {
            return Err(invalid(format!(
                "payload_size ({}) must not exceed {MAX_PAYLOAD_SIZE}",
                self.payload_size
            )));
        }
        if self.ping_count == 0 {
            return Err(invalid("ping_count must be greater than zero"));
        }
        if self.max_paths == 0 {
            return Err(invalid("max_paths must be greater than zero"));
        }
        if self.early_stop_threshold == 0 {
            return Err(invalid("early_stop_threshold must be greater than zero"));
        }
        if self.flow_variations == 0 {
            return Err(invalid("flow_variations must be greater than zero"));
        }
        Ok(())
    }

    fn bind(&self, interface: &Option<String>, source_ip: &Option<Ipv4Addr>) -> BindConfig {
        BindConfig {
            interface: interface.clone().or_else(|| self.interface.clone()),
            source_ip: source_ip.or(self.source_ip),
        }
    }

    /// Load a config file at `path`, falling through to `Self::default()`
    /// for any field the file leaves unset (every field is `#[serde(default)]`).
    pub fn load_from_file(path: &Path) -> NetpathResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| invalid(format!("could not read config file {}: {e}", path.display())))?;
        toml::from_str(&text).map_err(|e| invalid(format!("could not parse config file {}: {e}", path.display())))
    }

    /// Load from `default_config_path()` if that file exists, else fall
    /// back to built-in defaults; never errors on a missing file, only on
    /// one that exists but fails to parse.
    pub fn load_default() -> NetpathResult<Self> {
        match default_config_path() {
            Some(path) if path.is_file() => Self::load_from_file(&path),
            _ => Ok(Self::default()),
        }
    }
}

/// The platform config directory's `netpath/config.toml`, mirroring the
/// teacher's use of an XDG/platform base-directory strategy for its own
/// on-disk config file. Returns `None` only when the platform's home
/// directory can't be located at all (spec §6's config file is optional).
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    let strategy = etcetera::choose_base_strategy().ok()?;
    Some(strategy.config_dir().join("netpath").join("config.toml"))
}

fn invalid(reason: impl Into<String>) -> NetpathError {
    NetpathError::InvalidConfiguration { reason: reason.into() }
}

/// Per-operation override for one `trace`/`trace_classified` call.
#[derive(Debug, Clone, Default)]
pub struct TraceOverride {
    pub max_hops: Option<u8>,
    pub timeout: Option<Duration>,
    pub payload_size: Option<u16>,
    pub payload_pattern: Option<u8>,
    pub interface: Option<String>,
    pub source_ip: Option<Ipv4Addr>,
}

impl TraceOverride {
    #[must_use]
    pub fn resolve(&self, facade: &FacadeConfig) -> TraceConfig {
        TraceConfig {
            max_hops: self.max_hops.unwrap_or(facade.max_hops),
            timeout: self.timeout.unwrap_or(Duration::from_millis(facade.max_wait_ms)),
            payload_size: self.payload_size.unwrap_or(facade.payload_size),
            payload_pattern: self.payload_pattern.unwrap_or(facade.payload_pattern),
            bind: facade.bind(&self.interface, &self.source_ip),
        }
    }
}

/// Per-operation override for a streaming traceroute.
#[derive(Debug, Clone, Default)]
pub struct StreamingTraceOverride {
    pub trace: TraceOverride,
    pub retry_after: Option<Duration>,
}

impl StreamingTraceOverride {
    #[must_use]
    pub fn resolve(&self, facade: &FacadeConfig) -> StreamingTraceConfig {
        StreamingTraceConfig {
            trace: self.trace.resolve(facade),
            retry_after: self.retry_after.unwrap_or(Duration::from_millis(facade.retry_after_ms)),
        }
    }
}

/// Per-operation override for one `ping` call.
#[derive(Debug, Clone, Default)]
pub struct PingOverride {
    pub count: Option<u32>,
    pub interval: Option<Duration>,
    pub timeout: Option<Duration>,
    pub payload_size: Option<u16>,
    pub payload_pattern: Option<u8>,
    pub interface: Option<String>,
    pub source_ip: Option<Ipv4Addr>,
}

impl PingOverride {
    #[must_use]
    pub fn resolve(&self, facade: &FacadeConfig) -> PingConfig {
        PingConfig {
            count: self.count.unwrap_or(facade.ping_count),
            interval: self.interval.unwrap_or(Duration::from_millis(facade.ping_interval_ms)),
            timeout: self.timeout.unwrap_or(Duration::from_millis(facade.max_wait_ms)),
            payload_size: self.payload_size.unwrap_or(facade.payload_size),
            payload_pattern: self.payload_pattern.unwrap_or(facade.payload_pattern),
            bind: facade.bind(&self.interface, &self.source_ip),
        }
    }
}

/// Per-operation override for one `multipath` call. The resolved
/// `BindConfig` is returned alongside since `MultipathConfig` itself is
/// bind-agnostic (each constituent trace's bind config is supplied by the
/// facade when it builds the per-variation closure).
#[derive(Debug, Clone, Default)]
pub struct MultipathOverride {
    pub flow_variations: Option<u32>,
    pub max_paths: Option<usize>,
    pub early_stop_threshold: Option<usize>,
    pub timeout: Option<Duration>,
    pub max_hops: Option<u8>,
    pub interface: Option<String>,
    pub source_ip: Option<Ipv4Addr>,
}

impl MultipathOverride {
    #[must_use]
    pub fn resolve(&self, facade: &FacadeConfig) -> (MultipathConfig, BindConfig) {
        let config = MultipathConfig {
            flow_variations: self.flow_variations.unwrap_or(facade.flow_variations),
            max_paths: self.max_paths.unwrap_or(facade.max_paths),
            early_stop_threshold: self.early_stop_threshold.unwrap_or(facade.early_stop_threshold),
            timeout: self.timeout.unwrap_or(Duration::from_millis(facade.max_wait_ms)),
            max_hops: self.max_hops.unwrap_or(facade.max_hops),
            ..MultipathConfig::default()
        };
        (config, facade.bind(&self.interface, &self.source_ip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_override_falls_through_to_facade_defaults() {
        let facade = FacadeConfig::default();
        let over = TraceOverride::default();
        let resolved = over.resolve(&facade);
        assert_eq!(resolved.max_hops, facade.max_hops);
        assert_eq!(resolved.timeout, Duration::from_millis(facade.max_wait_ms));
    }

    #[test]
    fn trace_override_field_wins_over_facade_default() {
        let facade = FacadeConfig::default();
        let over = TraceOverride {
            max_hops: Some(5),
            ..Default::default()
        };
        let resolved = over.resolve(&facade);
        assert_eq!(resolved.max_hops, 5);
    }

    #[test]
    fn interface_override_wins_over_facade_interface() {
        let mut facade = FacadeConfig::default();
        facade.interface = Some("eth0".into());
        let over = TraceOverride {
            interface: Some("wg0".into()),
            ..Default::default()
        };
        let resolved = over.resolve(&facade);
        assert_eq!(resolved.bind.interface.as_deref(), Some("wg0"));
    }

    #[test]
    fn facade_interface_used_when_override_absent() {
        let mut facade = FacadeConfig::default();
        facade.interface = Some("eth0".into());
        let resolved = TraceOverride::default().resolve(&facade);
        assert_eq!(resolved.bind.interface.as_deref(), Some("eth0"));
    }

    #[test]
    fn zero_max_hops_is_rejected() {
        let mut facade = FacadeConfig::default();
        facade.max_hops = 0;
        assert!(matches!(facade.validate(), Err(NetpathError::InvalidConfiguration { .. })));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let mut facade = FacadeConfig::default();
        facade.payload_size = MAX_PAYLOAD_SIZE + 1;
        assert!(facade.validate().is_err());
    }

    #[test]
    fn default_config_round_trips_through_toml() {
        let facade = FacadeConfig::default();
        let text = toml::to_string(&facade).expect("serialize");
        let parsed: FacadeConfig = toml::from_str(&text).expect("deserialize");
        assert_eq!(parsed.max_hops, facade.max_hops);
        assert_eq!(parsed.rdns_cache_size, facade.rdns_cache_size);
    }

    #[test]
    fn load_from_file_applies_partial_overrides_and_keeps_other_defaults() {
        let dir = std::env::temp_dir().join(format!("netpath-config-test-{:?}", std::thread::current().id()));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        let path = dir.join("config.toml");
        std::fs::write(&path, "max_hops = 12\nping_count = 7\n").expect("write config");
        let loaded = FacadeConfig::load_from_file(&path).expect("load");
        assert_eq!(loaded.max_hops, 12);
        assert_eq!(loaded.ping_count, 7);
        assert_eq!(loaded.payload_size, FacadeConfig::default().payload_size);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn load_from_file_rejects_missing_file() {
        let missing = std::env::temp_dir().join("netpath-config-test-definitely-missing.toml");
        assert!(FacadeConfig::load_from_file(&missing).is_err());
    }

    #[test]
    fn load_default_falls_back_to_builtin_defaults_when_no_file_present() {
        let loaded = FacadeConfig::load_default().expect("load_default never fails on a missing file");
        assert_eq!(loaded.max_hops, FacadeConfig::default().max_hops);
    }
}
