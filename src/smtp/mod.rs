//! SMTP/LMTP server and client implementation (RFC 5321, RFC 2033).
//!
//! - [`session`]: unified SMTP/LMTP session state machine (MX, submission, LMTP)
//! - [`commands`]: command parsing
//! - [`client`]: outbound client used to hand a message to a remote MX
//! - [`worker`]: send-queue worker driving `client` off the mailstore
//! - [`server`]: listener setup for every SMTP/LMTP port

pub mod client;
pub mod commands;
pub mod server;
pub mod session;
pub mod worker;

pub use client::SmtpClient;
pub use commands::SmtpCommand;
pub use server::SmtpServer;
pub use session::{SessionConfig, SessionMode, SmtpSession};
pub use worker::SendQueueWorker;
