//! DKIM signing collaborator (§4.5). The signer is generic over a
//! `DkimKeySource` plug-in; failures anywhere in the chain (no key,
//! plug-in error) leave the raw bytes unmodified rather than failing the
//! send.

pub mod signer;

pub use signer::{DkimKeySource, DkimSigner, KeyMaterial, StaticKeySource};
