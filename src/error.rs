//! Error types returned by the core engines and the facade.
//!
//! Propagation policy (see spec §7): hard setup failures surface to the
//! caller as one of these variants. Runtime per-probe failures (a timed out
//! hop, an unreachable STUN server, a DNS miss) are recovered locally and
//! never appear here.

use std::io;

/// The top-level error type for all fallible operations in this crate.
#[derive(thiserror::Error, Debug)]
pub enum NetpathError {
    #[error("failed to resolve host `{host}`: {detail}")]
    ResolutionFailed { host: String, detail: String },

    #[error("failed to create socket: {detail} (errno {errno:?})")]
    SocketCreateFailed { errno: Option<i32>, detail: String },

    #[error("failed to set socket option `{option}` (errno {errno:?})")]
    SetsockoptFailed { option: &'static str, errno: Option<i32> },

    #[error("sendto failed (errno {errno:?})")]
    SendFailed { errno: Option<i32> },

    #[error("failed to bind to interface `{interface}`: {detail} (errno {errno:?})")]
    InterfaceBindFailed {
        interface: String,
        errno: Option<i32>,
        detail: String,
    },

    #[error("failed to bind to source IP `{source_ip}`: {detail} (errno {errno:?})")]
    SourceIpBindFailed {
        source_ip: String,
        errno: Option<i32>,
        detail: String,
    },

    #[error("invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    #[error("operation not supported on this platform: {detail}")]
    PlatformNotSupported { detail: String },

    #[error("operation cancelled")]
    Cancelled,
}

pub type NetpathResult<T> = Result<T, NetpathError>;

impl NetpathError {
    /// Wrap a std::io::Error that occurred while creating a socket.
    pub(crate) fn socket_create(err: &io::Error) -> Self {
        Self::SocketCreateFailed {
            errno: err.raw_os_error(),
            detail: err.to_string(),
        }
    }

    pub(crate) fn setsockopt(option: &'static str, err: &io::Error) -> Self {
        Self::SetsockoptFailed {
            option,
            errno: err.raw_os_error(),
        }
    }

    pub(crate) fn send(err: &io::Error) -> Self {
        Self::SendFailed {
            errno: err.raw_os_error(),
        }
    }

    pub(crate) fn interface_bind(interface: &str, err: &io::Error) -> Self {
        Self::InterfaceBindFailed {
            interface: interface.to_string(),
            errno: err.raw_os_error(),
            detail: err.to_string(),
        }
    }

    pub(crate) fn source_ip_bind(source_ip: &str, err: &io::Error) -> Self {
        Self::SourceIpBindFailed {
            source_ip: source_ip.to_string(),
            errno: err.raw_os_error(),
            detail: err.to_string(),
        }
    }
}
