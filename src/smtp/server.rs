//! Listener setup for every SMTP/LMTP port: MX (25), implicit-TLS
//! submission (465), STARTTLS submission (587), and LMTP (24, 1024).
//! Each port gets its own [`SessionConfig`] built once at startup and
//! shared (cheaply cloned) across every connection it accepts.

use std::net::IpAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info, info_span, warn, Instrument};

use crate::antispam::GreylistManager;
use crate::config::Config;
use crate::mailstore::Mailstore;
use crate::security::rate_limit::{RateLimit, RateLimiter};
use crate::security::Authenticator;
use crate::spam::client::SpamScannerClient;
use crate::transport::{MailStream, TlsSupport};

use super::session::{SessionConfig, SessionMode, SmtpSession};

pub struct SmtpServer {
    config: Config,
    store: Arc<Mailstore>,
    authenticator: Arc<Authenticator>,
    tls: Option<TlsSupport>,
    spam_scanner: Option<Arc<dyn SpamScannerClient>>,
    greylist: Option<Arc<GreylistManager>>,
    rate_limiter: Option<Arc<RateLimiter>>,
}

impl SmtpServer {
    pub fn new(
        config: Config,
        store: Arc<Mailstore>,
        authenticator: Arc<Authenticator>,
        tls: Option<TlsSupport>,
        spam_scanner: Option<Arc<dyn SpamScannerClient>>,
        greylist: Option<Arc<GreylistManager>>,
        rate_limiter: Option<Arc<RateLimiter>>,
    ) -> Self {
        SmtpServer {
            config,
            store,
            authenticator,
            tls,
            spam_scanner,
            greylist,
            rate_limiter,
        }
    }

    fn session_config(&self, mode: SessionMode, require_tls_before_mail: bool) -> SessionConfig {
        SessionConfig {
            mode,
            domain: self.config.server.domain.clone(),
            hostname: self.config.server.hostname.clone(),
            max_message_size: self.config.limits.max_email_size,
            require_tls_before_mail,
            tls: self.tls.clone(),
            store: self.store.clone(),
            authenticator: self.authenticator.clone(),
            auth_config: self.config.auth.clone(),
            spam_config: self.config.spam.clone(),
            spam_scanner: self.spam_scanner.clone(),
            greylist: self.greylist.clone(),
            rate_limiter: self.rate_limiter.clone(),
        }
    }

    /// Binds and serves every configured port concurrently; returns only
    /// if one of the listeners fails to bind.
    pub async fn run(self: Arc<Self>) -> crate::error::Result<()> {
        let ports = self.config.ports.clone();
        let tasks = vec![
            self.clone()
                .spawn_listener(ports.smtp25, self.session_config(SessionMode::Mx, false), false),
            self.clone().spawn_listener(
                ports.smtp587,
                self.session_config(SessionMode::Submission, true),
                false,
            ),
            // 465 is implicit TLS: the handshake happens right after
            // accept, before any SMTP byte, so STARTTLS is neither
            // required nor offered on this port.
            self.clone().spawn_listener(
                ports.smtp465,
                self.session_config(SessionMode::Submission, false),
                true,
            ),
            self.clone()
                .spawn_listener(ports.lmtp24, self.session_config(SessionMode::Lmtp, false), false),
            self.clone().spawn_listener(
                ports.lmtp1024,
                self.session_config(SessionMode::Lmtp, false),
                false,
            ),
        ];

        for task in tasks {
            task.await??;
        }
        Ok(())
    }

    fn spawn_listener(
        self: Arc<Self>,
        port: u16,
        session_config: SessionConfig,
        implicit_tls: bool,
    ) -> tokio::task::JoinHandle<crate::error::Result<()>> {
        tokio::spawn(async move {
            let addr = format!("0.0.0.0:{port}");
            let listener = TcpListener::bind(&addr).await?;
            info!(addr, mode = ?session_config.mode, implicit_tls, "listening");

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
                        let protocol = if config.mode == SessionMode::Lmtp { "lmtp" } else { "smtp" };
                        let span = info_span!("connection", %client_ip, protocol);
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

                                let session = SmtpSession::new(stream, client_ip, config);
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
