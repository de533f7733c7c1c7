//! mail-rs: a multi-protocol mail server (SMTP, LMTP, IMAP4rev1).
//!
//! # Features
//!
//! - **SMTP/LMTP**: inbound delivery (RFC 5321), authenticated submission,
//!   and final local delivery (RFC 2033)
//! - **IMAP4rev1**: the full mailbox-access command set (RFC 3501)
//! - **Security**: STARTTLS/implicit TLS, Argon2-hashed credentials,
//!   per-connection rate limiting
//! - **Storage**: a sqlx/SQLite-backed mailstore shared by every front end
//!
//! # Example
//!
//! ```no_run
//! use mail_rs::config::Config;
//! use mail_rs::mailstore::Mailstore;
//! use mail_rs::security::Authenticator;
//! use mail_rs::smtp::SmtpServer;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let store = Mailstore::connect(&config.database.url).await?;
//!     let authenticator = Arc::new(Authenticator::new(store.clone()));
//!
//!     let server = SmtpServer::new(config, store, authenticator, None, None, None, None);
//!     Arc::new(server).run().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`config`]: configuration management
//! - [`error`]: shared error taxonomy
//! - [`mailstore`]: mailbox/folder/message storage and the send queue
//! - [`smtp`]: SMTP/LMTP protocol implementation
//! - [`imap`]: IMAP4rev1 protocol implementation
//! - [`mime`]: MIME header/body parsing
//! - [`security`]: TLS, authentication, rate limiting
//! - [`antispam`]: greylisting
//! - [`spam`]: external spam-scanner collaborator and score policy
//! - [`dkim`]: outbound DKIM signing
//! - [`webhook`]: outbound delivery-event webhooks
//! - [`ip_selection`]: pluggable outbound source-IP selection
//! - [`transport`]: shared plaintext/TLS stream abstraction
//! - [`utils`]: DNS, email-address, and other shared helpers

pub mod antispam;
pub mod config;
pub mod dkim;
pub mod error;
pub mod imap;
pub mod ip_selection;
pub mod mailstore;
pub mod mime;
pub mod security;
pub mod smtp;
pub mod spam;
pub mod transport;
pub mod utils;
pub mod webhook;

pub use config::Config;
pub use error::{MailError, Result};
