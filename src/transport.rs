//! Shared transport layer for SMTP, LMTP, and IMAP listeners.
//!
//! A `MailStream` wraps either a plain `TcpStream` or a TLS-upgraded one
//! behind a single `AsyncRead`/`AsyncWrite` interface so the protocol
//! session loops never need to know which. STARTTLS upgrades happen via
//! `upgrade()`, which consumes the old stream and returns a new one — the
//! caller re-enters its read loop afterward rather than special-casing
//! the transport mid-command (§9's redesign note on the source's ad-hoc
//! STARTTLS rewiring).

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

use crate::error::{MailError, Result};

pub enum MailStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    /// Transient placeholder occupied only for the instant `upgrade()`
    /// takes ownership of the old stream via `mem::replace`. Never
    /// observable from outside this module.
    Upgrading,
}

impl MailStream {
    pub fn is_encrypted(&self) -> bool {
        matches!(self, MailStream::Tls(_))
    }

    /// Performs a TLS handshake in place, consuming `self`. Must only be
    /// called on a `Plain` stream.
    pub async fn upgrade(&mut self, acceptor: &TlsAcceptor) -> Result<()> {
        let owned = std::mem::replace(self, MailStream::Upgrading);
        let plain = match owned {
            MailStream::Plain(stream) => stream,
            other => {
                *self = other;
                return Err(MailError::Tls("STARTTLS on a non-plain stream".to_string()));
            }
        };
        let tls = acceptor
            .accept(plain)
            .await
            .map_err(|e| MailError::Tls(format!("TLS handshake failed: {e}")))?;
        *self = MailStream::Tls(Box::new(tls));
        Ok(())
    }
}

impl AsyncRead for MailStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MailStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            MailStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            MailStream::Upgrading => {
                unreachable!("I/O attempted on MailStream mid-upgrade")
            }
        }
    }
}

impl AsyncWrite for MailStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            MailStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            MailStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            MailStream::Upgrading => {
                unreachable!("I/O attempted on MailStream mid-upgrade")
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MailStream::Plain(s) => Pin::new(s).poll_flush(cx),
            MailStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
            MailStream::Upgrading => unreachable!(),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MailStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            MailStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            MailStream::Upgrading => unreachable!(),
        }
    }
}

/// Shared by every listener that offers STARTTLS: the acceptor to
/// upgrade with, plus whether the plaintext ports require it before
/// protocol-specific commands proceed.
#[derive(Clone)]
pub struct TlsSupport {
    pub acceptor: Arc<TlsAcceptor>,
}

impl TlsSupport {
    pub fn new(server_config: crate::security::TlsServerConfig) -> Self {
        TlsSupport {
            acceptor: Arc::new(server_config.acceptor()),
        }
    }
}
