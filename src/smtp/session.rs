//! Unified SMTP/LMTP session state machine.
//!
//! One state machine drives three front doors that differ only in
//! configuration: the MX port (25, unauthenticated inbound delivery, no
//! relay), the submission ports (587 with STARTTLS, 465 with implicit
//! TLS, both requiring AUTH before a transaction starts), and LMTP
//! (24/1024, final local delivery with a per-recipient response after
//! DATA, RFC 2033).

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::antispam::{GreylistManager, GreylistStatus};
use crate::config::{AuthConfig, SpamConfig};
use crate::error::{MailError, Result};
use crate::mailstore::{Flags, IncomingArchive, Mailstore, NewMessage, QueueStatus};
use crate::mime::MimeParser;
use crate::security::rate_limit::{RateLimit, RateLimiter};
use crate::security::Authenticator;
use crate::spam::client::{ScanContext, SpamScannerClient};
use crate::spam::policy::{self, PolicyAction};
use crate::transport::{MailStream, TlsSupport};
use crate::utils::email::domain_of;

use super::commands::SmtpCommand;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(300);
const DATA_TIMEOUT: Duration = Duration::from_secs(600);
const MAX_LINE_LENGTH: usize = 1000;
const MAX_ERRORS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpState {
    Fresh,
    Greeted,
    MailFrom,
    RcptTo,
}

/// What this listener is for; governs the auth/TLS requirements and the
/// shape of the DATA response (§4.2's port -> mail-type rule).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Port 25: unauthenticated inbound delivery to local mailboxes only.
    Mx,
    /// Ports 587/465: authenticated outbound submission.
    Submission,
    /// Ports 24/1024: LMTP final delivery, per-recipient DATA response.
    Lmtp,
}

/// Continuation state for multi-line AUTH exchanges, checked before
/// ordinary command dispatch in the read loop.
#[derive(Debug, Clone, PartialEq)]
enum PendingAuth {
    None,
    Plain,
    LoginUsername,
    LoginPassword(String),
}

pub enum SessionResult {
    Continue,
    Quit,
}

/// Ambient per-port configuration baked in by the listener, shared across
/// every connection it accepts.
#[derive(Clone)]
pub struct SessionConfig {
    pub mode: SessionMode,
    pub domain: String,
    pub hostname: String,
    pub max_message_size: usize,
    pub require_tls_before_mail: bool,
    pub tls: Option<TlsSupport>,
    pub store: Arc<Mailstore>,
    pub authenticator: Arc<Authenticator>,
    pub auth_config: AuthConfig,
    pub spam_config: SpamConfig,
    pub spam_scanner: Option<Arc<dyn SpamScannerClient>>,
    pub greylist: Option<Arc<GreylistManager>>,
    pub rate_limiter: Option<Arc<RateLimiter>>,
}

pub struct SmtpSession {
    stream: BufReader<MailStream>,
    config: SessionConfig,
    state: SmtpState,
    pending_auth: PendingAuth,
    client_ip: IpAddr,
    helo_domain: Option<String>,
    authenticated_user: Option<String>,
    from: Option<String>,
    to: Vec<String>,
    error_count: u32,
}

impl SmtpSession {
    pub fn new(stream: MailStream, client_ip: IpAddr, config: SessionConfig) -> Self {
        SmtpSession {
            stream: BufReader::new(stream),
            config,
            state: SmtpState::Fresh,
            pending_auth: PendingAuth::None,
            client_ip,
            helo_domain: None,
            authenticated_user: None,
            from: None,
            to: Vec::new(),
            error_count: 0,
        }
    }

    pub async fn handle(mut self) -> Result<()> {
        let greeting = match self.config.mode {
            SessionMode::Lmtp => format!("220 {} LMTP ready\r\n", self.config.hostname),
            _ => format!("220 {} ESMTP ready\r\n", self.config.hostname),
        };
        self.stream.get_mut().write_all(greeting.as_bytes()).await?;

        loop {
            match self.process_one().await {
                Ok(SessionResult::Continue) => continue,
                Ok(SessionResult::Quit) => break,
                Err(e) => {
                    warn!(error = %e, "session terminated");
                    break;
                }
            }
        }
        Ok(())
    }

    async fn process_one(&mut self) -> Result<SessionResult> {
        let line = self.read_line().await?;
        let Some(line) = line else {
            return Ok(SessionResult::Quit);
        };

        if self.pending_auth != PendingAuth::None {
            return self.handle_auth_continuation(line).await;
        }

        let cmd = match SmtpCommand::parse(&line) {
            Ok(cmd) => cmd,
            Err(e) => {
                self.bump_errors().await?;
                self.reply(e.smtp_code(), &e.to_string()).await?;
                return Ok(SessionResult::Continue);
            }
        };

        match self.dispatch(cmd).await {
            Ok(result) => Ok(result),
            Err(e) => {
                self.bump_errors().await?;
                self.reply(e.smtp_code(), &e.to_string()).await?;
                Ok(SessionResult::Continue)
            }
        }
    }

    async fn dispatch(&mut self, cmd: SmtpCommand) -> Result<SessionResult> {
        match cmd {
            SmtpCommand::Helo(domain) | SmtpCommand::Ehlo(domain) | SmtpCommand::Lhlo(domain) => {
                self.handle_greeting(domain).await
            }
            SmtpCommand::Starttls => self.handle_starttls().await,
            SmtpCommand::Auth(mechanism, initial) => self.handle_auth(mechanism, initial).await,
            SmtpCommand::MailFrom(from) => self.handle_mail_from(from).await,
            SmtpCommand::RcptTo(to) => self.handle_rcpt_to(to).await,
            SmtpCommand::Data => self.handle_data().await,
            SmtpCommand::Rset => self.handle_rset().await,
            SmtpCommand::Noop => {
                self.reply(250, "OK").await?;
                Ok(SessionResult::Continue)
            }
            SmtpCommand::Quit => {
                self.reply(221, "Bye").await?;
                Ok(SessionResult::Quit)
            }
            SmtpCommand::Unknown(cmd) => {
                Err(MailError::SyntaxError(format!("unrecognized command: {cmd}")))
            }
        }
    }

    async fn handle_greeting(&mut self, domain: String) -> Result<SessionResult> {
        self.helo_domain = Some(domain);
        self.state = SmtpState::Greeted;

        if self.config.mode == SessionMode::Lmtp {
            self.reply_multiline(&[
                format!("250-{}", self.config.hostname),
                "250 8BITMIME".to_string(),
            ])
            .await?;
            return Ok(SessionResult::Continue);
        }

        let mut lines = vec![format!("250-{}", self.config.hostname)];
        lines.push("250-8BITMIME".to_string());
        lines.push(format!("250-SIZE {}", self.config.max_message_size));
        if self.config.tls.is_some() && !self.stream.get_ref().is_encrypted() {
            lines.push("250-STARTTLS".to_string());
        }
        lines.push("250 AUTH PLAIN LOGIN".to_string());
        self.reply_multiline(&lines).await?;
        Ok(SessionResult::Continue)
    }

    async fn handle_starttls(&mut self) -> Result<SessionResult> {
        let Some(tls) = self.config.tls.clone() else {
            self.reply(454, "TLS not available").await?;
            return Ok(SessionResult::Continue);
        };
        if self.stream.get_ref().is_encrypted() {
            return Err(MailError::StateError("already encrypted".to_string()));
        }
        if self.authenticated_user.is_some() {
            return Err(MailError::StateError("STARTTLS not allowed after AUTH".to_string()));
        }

        self.reply(220, "Ready to start TLS").await?;
        self.stream.get_mut().upgrade(&tls.acceptor).await?;

        // RFC 3207: discard any prior greeting/state, client must re-HELO.
        self.state = SmtpState::Fresh;
        self.helo_domain = None;
        self.from = None;
        self.to.clear();
        info!("connection upgraded to TLS");
        Ok(SessionResult::Continue)
    }

    async fn handle_auth(&mut self, mechanism: String, initial: Option<String>) -> Result<SessionResult> {
        if self.state != SmtpState::Greeted {
            return Err(MailError::StateError("AUTH requires a prior greeting".to_string()));
        }
        if self.authenticated_user.is_some() {
            return Err(MailError::StateError("already authenticated".to_string()));
        }
        if self.config.require_tls_before_mail && !self.stream.get_ref().is_encrypted() {
            return Err(MailError::PolicyReject("AUTH requires an encrypted connection".to_string()));
        }

        match mechanism.to_uppercase().as_str() {
            "PLAIN" => match initial {
                Some(resp) => self.finish_plain_auth(&resp).await,
                None => {
                    self.pending_auth = PendingAuth::Plain;
                    self.reply_raw("334 \r\n").await?;
                    Ok(SessionResult::Continue)
                }
            },
            "LOGIN" => {
                self.pending_auth = PendingAuth::LoginUsername;
                self.reply_raw("334 VXNlcm5hbWU6\r\n").await?;
                Ok(SessionResult::Continue)
            }
            other => Err(MailError::SyntaxError(format!("unsupported AUTH mechanism: {other}"))),
        }
    }

    async fn handle_auth_continuation(&mut self, line: String) -> Result<SessionResult> {
        match std::mem::replace(&mut self.pending_auth, PendingAuth::None) {
            PendingAuth::Plain => self.finish_plain_auth(&line).await,
            PendingAuth::LoginUsername => {
                let username = Authenticator::decode_login_credential(&line)?;
                self.pending_auth = PendingAuth::LoginPassword(username);
                self.reply_raw("334 UGFzc3dvcmQ6\r\n").await?;
                Ok(SessionResult::Continue)
            }
            PendingAuth::LoginPassword(username) => {
                let password = Authenticator::decode_login_credential(&line)?;
                self.finish_auth(&username, &password).await
            }
            PendingAuth::None => unreachable!(),
        }
    }

    async fn finish_plain_auth(&mut self, resp: &str) -> Result<SessionResult> {
        let (username, password) = Authenticator::decode_plain_auth(resp)?;
        self.finish_auth(&username, &password).await
    }

    async fn finish_auth(&mut self, username: &str, password: &str) -> Result<SessionResult> {
        if let Some(limiter) = self.config.rate_limiter.clone() {
            if !limiter.check_ip_limit(&self.client_ip, RateLimit::SmtpAuthAttempts).await {
                return Err(MailError::Transient("too many auth attempts, try again later".to_string()));
            }
        }
        match self.config.authenticator.verify(username, password).await? {
            Some(outcome) => {
                self.authenticated_user = Some(outcome.username);
                self.reply(235, "Authentication successful").await?;
                Ok(SessionResult::Continue)
            }
            None => Err(MailError::AuthFailed),
        }
    }

    async fn handle_mail_from(&mut self, from: String) -> Result<SessionResult> {
        if self.state != SmtpState::Greeted {
            return Err(MailError::StateError("MAIL FROM out of sequence".to_string()));
        }
        if self.config.require_tls_before_mail && !self.stream.get_ref().is_encrypted() {
            return Err(MailError::PolicyReject("STARTTLS required before MAIL FROM".to_string()));
        }

        crate::utils::email::validate_email(&from)?;

        if self.config.mode == SessionMode::Submission {
            let user = self.authenticated_user.as_deref().ok_or(MailError::AuthRequired)?;
            if !domain_of(user).eq_ignore_ascii_case(domain_of(&from)) {
                return Err(MailError::PolicyReject(
                    "envelope sender domain must match the authenticated account".to_string(),
                ));
            }
        }

        self.from = Some(from);
        self.to.clear();
        self.state = SmtpState::MailFrom;
        self.reply(250, "OK").await?;
        Ok(SessionResult::Continue)
    }

    async fn handle_rcpt_to(&mut self, to: String) -> Result<SessionResult> {
        if !matches!(self.state, SmtpState::MailFrom | SmtpState::RcptTo) {
            return Err(MailError::StateError("RCPT TO out of sequence".to_string()));
        }
        crate::utils::email::validate_email(&to)?;

        if self.config.mode == SessionMode::Mx
            && !domain_of(&to).eq_ignore_ascii_case(&self.config.domain)
        {
            return Err(MailError::PolicyReject("relay not permitted".to_string()));
        }

        self.to.push(to);
        self.state = SmtpState::RcptTo;
        self.reply(250, "OK").await?;
        Ok(SessionResult::Continue)
    }

    async fn handle_rset(&mut self) -> Result<SessionResult> {
        self.from = None;
        self.to.clear();
        self.state = SmtpState::Greeted;
        self.reply(250, "OK").await?;
        Ok(SessionResult::Continue)
    }

    async fn handle_data(&mut self) -> Result<SessionResult> {
        if self.state != SmtpState::RcptTo {
            return Err(MailError::StateError("DATA out of sequence".to_string()));
        }
        self.reply(354, "Start mail input; end with <CRLF>.<CRLF>").await?;

        let raw = self.receive_data().await?;
        self.state = SmtpState::Greeted;

        if raw.len() > self.config.max_message_size {
            self.from = None;
            self.to.clear();
            return Err(MailError::PolicyReject("message exceeds size limit".to_string()));
        }

        match self.config.mode {
            SessionMode::Submission => self.deliver_outbound(raw).await?,
            SessionMode::Mx | SessionMode::Lmtp => self.deliver_inbound(raw).await?,
        }

        self.from = None;
        self.to.clear();
        Ok(SessionResult::Continue)
    }

    async fn receive_data(&mut self) -> Result<Vec<u8>> {
        let mut raw = Vec::new();
        loop {
            let line = timeout(DATA_TIMEOUT, self.read_raw_line())
                .await
                .map_err(|_| MailError::Transient("DATA read timed out".to_string()))??;
            let Some(line) = line else {
                return Err(MailError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed mid-DATA",
                )));
            };
            if line == "." {
                break;
            }
            let unstuffed = match line.strip_prefix("..") {
                Some(rest) => format!(".{rest}"),
                None => line,
            };
            raw.extend_from_slice(unstuffed.as_bytes());
            raw.extend_from_slice(b"\r\n");
        }
        Ok(raw)
    }

    async fn deliver_outbound(&mut self, raw: Vec<u8>) -> Result<()> {
        let owner = self.authenticated_user.clone().ok_or(MailError::AuthRequired)?;
        let from = self.from.clone().unwrap_or_default();
        let parsed = MimeParser::parse(&raw).ok();

        let new_msg = NewMessage {
            owner,
            folder: "Sent".to_string(),
            raw,
            subject: parsed.as_ref().and_then(|p| p.headers.get("subject").cloned()),
            from_addr: Some(from),
            to_addrs: self.to.clone(),
            text_body: parsed.as_ref().and_then(|p| p.text_body.clone()),
            html_body: parsed.as_ref().and_then(|p| p.html_body.clone()),
            message_id: parsed.as_ref().and_then(|p| p.headers.get("message-id").cloned()),
            in_reply_to: parsed.as_ref().and_then(|p| p.headers.get("in-reply-to").cloned()),
            references: vec![],
            flags: Flags::default(),
            status: Some(QueueStatus::Pending),
        };

        self.config.store.create_message(new_msg).await?;
        self.reply(250, "Message queued for delivery").await?;
        Ok(())
    }

    async fn deliver_inbound(&mut self, raw: Vec<u8>) -> Result<()> {
        let sender = self.from.clone().unwrap_or_default();
        let recipients = self.to.clone();

        let mut raw = raw;
        if self.config.spam_config.enabled && self.config.spam_config.inbound_enabled {
            if let Some(scanner) = self.config.spam_scanner.clone() {
                let ctx = ScanContext {
                    sender: sender.clone(),
                    recipients: recipients.clone(),
                    ip: self.client_ip.to_string(),
                    helo: self.helo_domain.clone().unwrap_or_default(),
                    hostname: self.config.hostname.clone(),
                };
                let verdict = scanner.scan(&raw, &ctx).await;
                match policy::classify(&verdict, &self.config.spam_config) {
                    PolicyAction::Reject => {
                        return Err(MailError::PolicyReject("message rejected by spam policy".to_string()));
                    }
                    PolicyAction::Greylist => {
                        if !self.passes_greylist(&sender, &recipients).await? {
                            return Err(MailError::Transient("greylisted, please retry later".to_string()));
                        }
                    }
                    PolicyAction::AcceptWithHeaders => {
                        let headers = policy::build_headers(&verdict, &self.config.spam_config);
                        raw = policy::prepend_headers(&raw, &headers);
                    }
                    PolicyAction::AcceptClean => {}
                }
            }
        }

        let parsed = MimeParser::parse(&raw).ok();

        let archive = IncomingArchive {
            id: uuid::Uuid::new_v4().to_string(),
            sender: Some(sender.clone()),
            recipients_json: serde_json::to_string(&recipients).unwrap_or_else(|_| "[]".to_string()),
            raw: raw.clone(),
            source: match self.config.mode {
                SessionMode::Lmtp => "lmtp".to_string(),
                _ => "smtp".to_string(),
            },
            received_at: Utc::now(),
            headers_json: parsed
                .as_ref()
                .map(|p| serde_json::to_string(&p.headers).unwrap_or_else(|_| "{}".to_string()))
                .unwrap_or_else(|| "{}".to_string()),
        };
        if let Err(e) = self.config.store.append_archive(archive).await {
            warn!(error = %e, "failed to persist incoming archive");
            return Err(MailError::Transient(format!("could not persist message: {e}")));
        }

        let mut per_recipient = Vec::new();
        for recipient in &recipients {
            if !self.config.store.mailbox_exists(recipient).await? {
                warn!(%recipient, "no such mailbox, archived only");
                per_recipient.push((
                    recipient.clone(),
                    Err(MailError::NotFound(format!("no such mailbox: {recipient}"))),
                ));
                continue;
            }

            let new_msg = NewMessage {
                owner: recipient.clone(),
                folder: "INBOX".to_string(),
                raw: raw.clone(),
                subject: parsed.as_ref().and_then(|p| p.headers.get("subject").cloned()),
                from_addr: Some(sender.clone()),
                to_addrs: recipients.clone(),
                text_body: parsed.as_ref().and_then(|p| p.text_body.clone()),
                html_body: parsed.as_ref().and_then(|p| p.html_body.clone()),
                message_id: parsed.as_ref().and_then(|p| p.headers.get("message-id").cloned()),
                in_reply_to: parsed.as_ref().and_then(|p| p.headers.get("in-reply-to").cloned()),
                references: vec![],
                flags: Flags::default(),
                status: None,
            };
            let outcome = self.config.store.create_message(new_msg).await;
            per_recipient.push((recipient.clone(), outcome));
        }

        if self.config.mode == SessionMode::Lmtp {
            for (recipient, outcome) in per_recipient {
                match outcome {
                    Ok(_) => self.reply(250, &format!("<{recipient}> delivered")).await?,
                    Err(e) => self.reply(e.smtp_code(), &format!("<{recipient}>: {e}")).await?,
                }
            }
        } else {
            for (_, outcome) in &per_recipient {
                if let Err(e) = outcome {
                    warn!(error = %e, "failed to persist a recipient's copy");
                }
            }
            self.reply(250, "OK: message accepted for delivery").await?;
        }
        Ok(())
    }

    /// Consults the greylist for every recipient of the current
    /// transaction. A blacklisted sender fails the whole message; a
    /// sender still mid-delay for any recipient defers the whole
    /// message (simplest correct behavior for a multi-recipient DATA).
    async fn passes_greylist(&self, sender: &str, recipients: &[String]) -> Result<bool> {
        let Some(greylist) = self.config.greylist.clone() else {
            return Ok(true);
        };
        let ip = self.client_ip.to_string();
        for recipient in recipients {
            match greylist.check(sender, recipient, &ip).await {
                GreylistStatus::Blacklisted => {
                    return Err(MailError::PolicyReject("sender is blacklisted".to_string()));
                }
                GreylistStatus::Greylisted => return Ok(false),
                GreylistStatus::Whitelisted => {}
            }
        }
        Ok(true)
    }

    async fn bump_errors(&mut self) -> Result<()> {
        self.error_count += 1;
        if self.error_count >= MAX_ERRORS {
            self.reply(421, "Too many errors, closing connection").await?;
            return Err(MailError::Protocol("too many client errors".to_string()));
        }
        Ok(())
    }

    async fn reply(&mut self, code: u16, message: &str) -> Result<()> {
        let line = format!("{code} {message}\r\n");
        self.stream.get_mut().write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn reply_raw(&mut self, line: &str) -> Result<()> {
        self.stream.get_mut().write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn reply_multiline(&mut self, lines: &[String]) -> Result<()> {
        let joined = lines.join("\r\n") + "\r\n";
        self.stream.get_mut().write_all(joined.as_bytes()).await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<Option<String>> {
        timeout(COMMAND_TIMEOUT, self.read_raw_line())
            .await
            .map_err(|_| MailError::Transient("command timed out".to_string()))?
    }

    async fn read_raw_line(&mut self) -> Result<Option<String>> {
        let mut buf = Vec::new();
        let n = self.stream.read_until(b'\n', &mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        if buf.len() > MAX_LINE_LENGTH {
            return Err(MailError::SyntaxError("line too long".to_string()));
        }
        while buf.last() == Some(&b'\n') || buf.last() == Some(&b'\r') {
            buf.pop();
        }
        Ok(Some(String::from_utf8_lossy(&buf).to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader as TokioBufReader};
    use tokio::net::TcpListener;
    use tokio::time::sleep;

    use crate::config::Config;
    use crate::mailstore::Mailstore;
    use crate::security::Authenticator;
    use crate::spam::client::{MockSpamScannerClient, Verdict, VerdictAction};

    use super::*;

    async fn read_line(reader: &mut TokioBufReader<tokio::net::tcp::OwnedReadHalf>) -> String {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        line
    }

    async fn write_line(writer: &mut tokio::net::tcp::OwnedWriteHalf, line: &str) {
        writer.write_all(format!("{line}\r\n").as_bytes()).await.unwrap();
    }

    /// A scanner mocked to always condemn the message proves the
    /// scan→classify→reject path is reachable without a live rspamd.
    #[tokio::test]
    async fn spam_scanner_reject_verdict_fails_the_transaction() {
        let mut scanner = MockSpamScannerClient::new();
        scanner.expect_scan().returning(|_, _| Verdict {
            action: Some(VerdictAction::Reject),
            score: 20.0,
            required_score: 15.0,
            symbols: vec!["GTUBE".to_string()],
            messages: Vec::new(),
        });

        let store = Mailstore::connect("sqlite::memory:").await.unwrap();
        let authenticator = Arc::new(Authenticator::new(store.clone()));
        let config = Config::default();

        let mut spam_config = config.spam.clone();
        spam_config.enabled = true;
        spam_config.inbound_enabled = true;

        let session_config = SessionConfig {
            mode: SessionMode::Mx,
            domain: config.server.domain.clone(),
            hostname: config.server.hostname.clone(),
            max_message_size: config.limits.max_email_size,
            require_tls_before_mail: false,
            tls: None,
            store,
            authenticator,
            auth_config: config.auth.clone(),
            spam_config,
            spam_scanner: Some(Arc::new(scanner)),
            greylist: None,
            rate_limiter: None,
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (socket, peer) = listener.accept().await.unwrap();
            let session = SmtpSession::new(MailStream::Plain(socket), peer.ip(), session_config);
            let _ = session.handle().await;
        });
        sleep(Duration::from_millis(50)).await;

        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = TokioBufReader::new(read_half);

        let _greeting = read_line(&mut reader).await;
        write_line(&mut write_half, "EHLO client.test").await;
        loop {
            if read_line(&mut reader).await.starts_with("250 ") {
                break;
            }
        }

        write_line(&mut write_half, "MAIL FROM:<sender@example.test>").await;
        assert!(read_line(&mut reader).await.starts_with("250"));

        write_line(&mut write_half, "RCPT TO:<recipient@example.test>").await;
        assert!(read_line(&mut reader).await.starts_with("250"));

        write_line(&mut write_half, "DATA").await;
        assert!(read_line(&mut reader).await.starts_with("354"));

        write_line(&mut write_half, "Subject: gtube").await;
        write_line(&mut write_half, "").await;
        write_line(&mut write_half, "spam body").await;
        write_line(&mut write_half, ".").await;
        let response = read_line(&mut reader).await;
        assert!(response.starts_with("550"), "expected policy rejection, got: {response}");
    }
}
