//! Listener setup for the IMAP4rev1 ports: plaintext/STARTTLS (143) and
//! implicit-TLS (993). Mirrors the SMTP front end's listener shape: one
//! [`ImapSessionConfig`] built once at startup, cheaply cloned per
//! connection.

use std::net::IpAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::Config;
use crate::mailstore::Mailstore;
use crate::security::rate_limit::{RateLimit, RateLimiter};
use crate::security::Authenticator;
use crate::transport::{MailStream, TlsSupport};

use super::session::{ImapSession, ImapSessionConfig};

pub struct ImapServer {
    config: Config,
    store: Arc<Mailstore>,
    authenticator: Arc<Authenticator>,
    tls: Option<TlsSupport>,
    rate_limiter: Option<Arc<RateLimiter>>,
}

impl ImapServer {
    pub fn new(
        config: Config,
        store: Arc<Mailstore>,
        authenticator: Arc<Authenticator>,
        tls: Option<TlsSupport>,
        rate_limiter: Option<Arc<RateLimiter>>,
    ) -> Self {
        ImapServer { config, store, authenticator, tls, rate_limiter }
    }

    fn session_config(&self, tls: Option<TlsSupport>) -> ImapSessionConfig {
        ImapSessionConfig {
            hostname: self.config.server.hostname.clone(),
            tls,
            store: self.store.clone(),
            authenticator: self.authenticator.clone(),
            rate_limiter: self.rate_limiter.clone(),
        }
    }

    /// Binds and serves both IMAP ports concurrently; returns only if one
    /// of the listeners fails to bind.
    pub async fn run(self: Arc<Self>) -> crate::error::Result<()> {
        let ports = self.config.ports.clone();
        let tasks = vec![
            self.clone().spawn_listener(ports.imap143, self.session_config(self.tls.clone()), false),
            self.clone().spawn_listener(ports.imap993, self.session_config(self.tls.clone()), true),
        ];

        for task in tasks {
            task.await??;
        }
        Ok(())
    }

    fn spawn_listener(
        self: Arc<Self>,
        port: u16,
        session_config: ImapSessionConfig,
        implicit_tls: bool,
    ) -> tokio::task::JoinHandle<crate::error::Result<()>> {
        tokio::spawn(async move {
            let addr = format!("0.0.0.0:{port}");
            let listener = TcpListener::bind(&addr).await?;
            info!(addr, implicit_tls, "listening");

            loop {
                match listener.accept().await {
                    Ok((socket, peer)) => {
                        let client_ip: IpAddr = peer.ip();
                        let config = session_config.clone();
                        if let Some(limiter) = &config.rate_limiter {
                            if !limiter.check_ip_limit(&client_ip, RateLimit::SmtpConnections).await {
                                warn!(%client_ip, "connection rate limit exceeded, dropping");
                                continue;
                            }
                        }
                        let span = info_span!("connection", %client_ip, protocol = "imap");
                        tokio::spawn(
                            async move {
                                let stream = if implicit_tls {
                                    match &config.tls {
                                        Some(tls) => match tls.acceptor.accept(socket).await {
                                            Ok(tls_stream) => MailStream::Tls(Box::new(tls_stream)),
                                            Err(e) => {
                                                warn!(error = %e, %client_ip, "implicit TLS handshake failed");
                                                return;
                                            }
                                        },
                                        None => {
                                            warn!(%client_ip, "implicit TLS port accepted with no TLS configured");
                                            return;
                                        }
                                    }
                                } else {
                                    MailStream::Plain(socket)
                                };

                                let session = ImapSession::new(stream, client_ip, config);
                                if let Err(e) = session.handle().await {
                                    error!(error = %e, %client_ip, "session ended with error");
                                }
                            }
                            .instrument(span),
                        );
                    }
                    Err(e) => error!(error = %e, addr, "accept failed"),
                }
            }
        })
    }
}
