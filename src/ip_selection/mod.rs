//! Pluggable outbound source-IP selector (§4.4, §6).

pub mod client;

pub use client::{IpSelectionContext, IpSelector, NoopSelector};
