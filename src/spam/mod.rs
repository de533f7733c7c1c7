//! Spam scanning collaborator: an external HTTP scanner client plus the
//! score→action policy layered on top of it.

pub mod client;
pub mod policy;
pub mod types;

pub use client::{HttpSpamScanner, ScanContext, SpamScannerClient, Verdict, VerdictAction};
pub use policy::{build_headers, classify, prepend_headers, PolicyAction};
