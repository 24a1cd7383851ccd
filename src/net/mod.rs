//! Socket plumbing shared by the traceroute and ping engines.

pub mod readiness;
mod socket;

pub use socket::{BindConfig, IcmpSocket};
