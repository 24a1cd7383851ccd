//! `netpath-core`: a user-space IPv4 network-path diagnostics engine.
//!
//! Parallel traceroute, concurrent ping, ECMP multipath discovery, and
//! ASN-based path classification, all over unprivileged `SOCK_DGRAM`
//! ICMP sockets. [`Facade`] is the entry point most callers want; the
//! individual engine modules are public for callers who need finer
//! control over socket lifetime or want to compose their own pipeline.

pub mod asn;
pub mod classify;
pub mod clock;
pub mod config;
pub mod error;
mod facade;
pub mod icmp;
pub mod multipath;
pub mod net;
pub mod ping;
pub mod publicip;
pub mod rdns;
pub mod resolve;
pub mod trace;
pub mod types;
mod util;

pub use config::FacadeConfig;
pub use error::{NetpathError, NetpathResult};
pub use facade::{Facade, TraceHandleId, VpnHint};
