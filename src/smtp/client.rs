//! Outbound SMTP client used by the send-queue worker to hand a signed
//! message to a recipient's MX host (RFC 5321).
//!
//! # Security
//! - Opportunistic STARTTLS, never required (many MX hosts never upgrade)
//! - 30s connect/read timeout on every I/O step (§4.4)

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf};
use tokio::net::{TcpSocket, TcpStream};
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::{self, ClientConfig};
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

use crate::error::{MailError, Result};

const IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Plaintext-or-TLS outbound socket. Mirrors `transport::MailStream`'s
/// shape but wraps the client-side `tokio_rustls` handshake instead of
/// the server-side acceptor one, since this connects out rather than
/// accepting in.
enum RemoteStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    Upgrading,
}

impl AsyncRead for RemoteStream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            RemoteStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            RemoteStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            RemoteStream::Upgrading => unreachable!("I/O attempted mid-upgrade"),
        }
    }
}

impl AsyncWrite for RemoteStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            RemoteStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            RemoteStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            RemoteStream::Upgrading => unreachable!("I/O attempted mid-upgrade"),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            RemoteStream::Plain(s) => Pin::new(s).poll_flush(cx),
            RemoteStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
            RemoteStream::Upgrading => unreachable!(),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            RemoteStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            RemoteStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            RemoteStream::Upgrading => unreachable!(),
        }
    }
}

/// Outbound SMTP client for a single MX host. One instance per delivery
/// attempt; never reused across attempts.
pub struct SmtpClient {
    server_addr: String,
    local_bind: Option<Ipv4Addr>,
    ehlo_domain: String,
}

impl SmtpClient {
    pub fn new(server_addr: String) -> Self {
        SmtpClient {
            server_addr,
            local_bind: None,
            ehlo_domain: Self::default_hostname(),
        }
    }

    pub fn with_local_bind(mut self, ip: Option<Ipv4Addr>) -> Self {
        self.local_bind = ip;
        self
    }

    pub fn with_ehlo_domain(mut self, domain: String) -> Self {
        self.ehlo_domain = domain;
        self
    }

    /// Connects, runs the full transaction, and reports the remote's
    /// final response for the message body. `data` is expected to already
    /// carry any DKIM signature and end with a bare `\r\n`.
    pub async fn send_mail(&self, from: &str, to: &str, data: &[u8]) -> Result<String> {
        info!(to, server = %self.server_addr, "connecting to remote MX");
        let mut stream = self.connect().await?;

        let greeting = self.read_response(&mut stream).await?;
        Self::expect_code(&greeting, 220)?;

        self.write_line(&mut stream, &format!("EHLO {}", self.ehlo_domain)).await?;
        let ehlo_resp = self.read_response(&mut stream).await?;
        Self::expect_code(&ehlo_resp, 250)?;

        if ehlo_resp.to_uppercase().contains("STARTTLS") {
            if let Err(e) = self.try_starttls(&mut stream).await {
                warn!(error = %e, "opportunistic STARTTLS failed, continuing in plaintext");
            }
        }

        self.write_line(&mut stream, &format!("MAIL FROM:<{from}>")).await?;
        Self::expect_code(&self.read_response(&mut stream).await?, 250)?;

        self.write_line(&mut stream, &format!("RCPT TO:<{to}>")).await?;
        Self::expect_code(&self.read_response(&mut stream).await?, 250)?;

        self.write_line(&mut stream, "DATA").await?;
        Self::expect_code(&self.read_response(&mut stream).await?, 354)?;

        timeout(IO_TIMEOUT, stream.write_all(data))
            .await
            .map_err(|_| MailError::Transient("timed out sending message body".to_string()))??;
        if !data.ends_with(b"\r\n") {
            stream.write_all(b"\r\n").await?;
        }
        stream.write_all(b".\r\n").await?;

        let data_resp = self.read_response(&mut stream).await?;
        Self::expect_code(&data_resp, 250)?;

        self.write_line(&mut stream, "QUIT").await?;
        let _ = self.read_response(&mut stream).await;

        Ok(data_resp)
    }

    async fn connect(&self) -> Result<RemoteStream> {
        let stream = timeout(IO_TIMEOUT, self.connect_tcp())
            .await
            .map_err(|_| MailError::Transient(format!("connect to {} timed out", self.server_addr)))??;
        Ok(RemoteStream::Plain(stream))
    }

    async fn connect_tcp(&self) -> Result<TcpStream> {
        let addrs = crate::utils::dns::resolve_mail_server(&self.server_addr).await?;
        let addr = addrs
            .into_iter()
            .next()
            .ok_or_else(|| MailError::DnsLookup(format!("no addresses for {}", self.server_addr)))?;

        match self.local_bind {
            Some(ip) => {
                let socket = TcpSocket::new_v4()?;
                socket.bind(SocketAddr::new(IpAddr::V4(ip), 0))?;
                Ok(socket.connect(addr).await?)
            }
            None => Ok(TcpStream::connect(addr).await?),
        }
    }

    /// Upgrades the plaintext connection to TLS. Certificate validation is
    /// intentionally permissive — many legitimate MX hosts present
    /// self-signed or expired certificates, and STARTTLS here is about
    /// confidentiality in transit, not authenticating the remote peer.
    async fn try_starttls(&self, stream: &mut RemoteStream) -> Result<()> {
        self.write_line(stream, "STARTTLS").await?;
        Self::expect_code(&self.read_response(stream).await?, 220)?;

        let owned = std::mem::replace(stream, RemoteStream::Upgrading);
        let RemoteStream::Plain(tcp) = owned else {
            *stream = owned;
            return Err(MailError::Tls("STARTTLS on a non-plain stream".to_string()));
        };

        let config = ClientConfig::builder()
            .with_safe_defaults()
            .with_custom_certificate_verifier(std::sync::Arc::new(NoVerify))
            .with_no_client_auth();
        let connector = TlsConnector::from(std::sync::Arc::new(config));
        let server_name = rustls::ServerName::try_from(self.ehlo_domain.as_str())
            .unwrap_or_else(|_| rustls::ServerName::try_from("mail.invalid").unwrap());

        let tls = timeout(IO_TIMEOUT, connector.connect(server_name, tcp))
            .await
            .map_err(|_| MailError::Tls("TLS handshake timed out".to_string()))?
            .map_err(|e| MailError::Tls(format!("TLS handshake failed: {e}")))?;

        *stream = RemoteStream::Tls(Box::new(tls));
        Ok(())
    }

    async fn read_response(&self, stream: &mut RemoteStream) -> Result<String> {
        let mut reader = BufReader::new(stream);
        let mut full = String::new();
        loop {
            let mut line = String::new();
            let n = timeout(IO_TIMEOUT, reader.read_line(&mut line))
                .await
                .map_err(|_| MailError::Transient("remote response timed out".to_string()))??;
            if n == 0 {
                return Err(MailError::Transient("connection closed by remote".to_string()));
            }
            debug!("< {}", line.trim_end());
            full.push_str(&line);
            if line.len() < 4 || line.as_bytes()[3] == b' ' {
                break;
            }
        }
        Ok(full)
    }

    async fn write_line(&self, stream: &mut RemoteStream, line: &str) -> Result<()> {
        debug!("> {}", line);
        timeout(IO_TIMEOUT, stream.write_all(format!("{line}\r\n").as_bytes()))
            .await
            .map_err(|_| MailError::Transient("write to remote timed out".to_string()))??;
        Ok(())
    }

    /// Parses the SMTP reply code and returns `RemoteSmtp` on anything
    /// outside `[expected, expected+10)` so 4xx/5xx map cleanly to the
    /// §7 error taxonomy.
    fn expect_code(response: &str, expected: u16) -> Result<()> {
        let code: u16 = response
            .get(0..3)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| MailError::Protocol(format!("malformed SMTP response: {response}")))?;
        if code / 10 == expected / 10 {
            Ok(())
        } else {
            Err(MailError::RemoteSmtp {
                code,
                message: response.trim().to_string(),
            })
        }
    }

    fn default_hostname() -> String {
        gethostname::gethostname().to_string_lossy().to_string()
    }
}

/// Accepts any server certificate. STARTTLS to arbitrary MX hosts has no
/// pre-established trust anchor; this matches how most relay-to-relay
/// SMTP deployments treat opportunistic TLS (confidentiality, not PKI
/// authentication of the remote).
struct NoVerify;

impl rustls::client::ServerCertVerifier for NoVerify {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::Certificate,
        _intermediates: &[rustls::Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> std::result::Result<rustls::client::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::ServerCertVerified::assertion())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expect_code_accepts_matching_class() {
        assert!(SmtpClient::expect_code("250 OK\r\n", 250).is_ok());
        assert!(SmtpClient::expect_code("251-more\r\n", 250).is_ok());
    }

    #[test]
    fn expect_code_rejects_and_classifies_remote_error() {
        let err = SmtpClient::expect_code("550 no such user\r\n", 250).unwrap_err();
        match err {
            MailError::RemoteSmtp { code, .. } => assert_eq!(code, 550),
            other => panic!("expected RemoteSmtp, got {other:?}"),
        }
    }

    #[test]
    fn transient_remote_errors_are_retryable() {
        let err = SmtpClient::expect_code("451 try again\r\n", 250).unwrap_err();
        assert!(err.is_transient_remote());
    }
}
