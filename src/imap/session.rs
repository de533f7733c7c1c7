//! IMAP4rev1 session state machine (RFC 3501).
//!
//! One state machine drives both plaintext (port 143, STARTTLS) and
//! implicit-TLS (port 993) listeners. A session snapshots its selected
//! folder at SELECT time — index+1 in that snapshot is the sequence
//! number for every subsequent command in the session, matching the
//! "sequence numbers are stable for the lifetime of the selection"
//! contract in §4.6 — and refreshes individual entries in place as STORE/
//! EXPUNGE mutate them.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::error::{MailError, Result};
use crate::mailstore::model::{ChangeKind, Flags, Message, NewMessage};
use crate::mailstore::Mailstore;
use crate::mime::MimeParser;
use crate::security::rate_limit::{RateLimit, RateLimiter};
use crate::security::Authenticator;
use crate::transport::{MailStream, TlsSupport};

use super::commands::{ImapCommand, StoreOperation, ThreadAlgorithm};
use super::search::{self, SearchCriteria};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(1800);
const MAX_LINE_LENGTH: usize = 8192;

pub const CAPABILITY_STRING: &str = "IMAP4rev1 STARTTLS AUTH=PLAIN AUTH=LOGIN IDLE NAMESPACE ID ENABLE UIDPLUS SORT SORT=DISPLAY THREAD=ORDEREDSUBJECT THREAD=REFERENCES ESEARCH WITHIN MOVE SPECIAL-USE UNSELECT CHILDREN";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotAuthenticated,
    Authenticated,
    Selected,
}

/// Multi-line continuation state, checked before ordinary command
/// dispatch in the read loop — the same shape as the SMTP session's
/// `PendingAuth`, generalized to cover IDLE as a third continuation kind.
#[derive(Debug, Clone, PartialEq)]
enum PendingContinuation {
    None,
    AuthPlain,
    AuthLoginUser,
    AuthLoginPassword(String),
    Idle,
}

/// The folder a session has SELECTed/EXAMINEd, plus the sequence-number
/// snapshot taken at that moment (RFC 3501 §5.1: sequence numbers only
/// change in response to EXPUNGE).
struct SelectedMailbox {
    name: String,
    read_only: bool,
    snapshot: Vec<Message>,
    #[allow(dead_code)]
    uid_validity: i64,
}

#[derive(Clone)]
pub struct ImapSessionConfig {
    pub hostname: String,
    pub tls: Option<TlsSupport>,
    pub store: Arc<Mailstore>,
    pub authenticator: Arc<Authenticator>,
    pub rate_limiter: Option<Arc<RateLimiter>>,
}

pub struct ImapSession {
    stream: BufReader<MailStream>,
    config: ImapSessionConfig,
    state: SessionState,
    pending: PendingContinuation,
    client_ip: IpAddr,
    authenticated_user: Option<String>,
    selected: Option<SelectedMailbox>,
    last_tag: String,
}

pub enum SessionResult {
    Continue,
    Quit,
}

impl ImapSession {
    pub fn new(stream: MailStream, client_ip: IpAddr, config: ImapSessionConfig) -> Self {
        ImapSession {
            stream: BufReader::new(stream),
            config,
            state: SessionState::NotAuthenticated,
            pending: PendingContinuation::None,
            client_ip,
            authenticated_user: None,
            selected: None,
            last_tag: String::new(),
        }
    }

    pub async fn handle(mut self) -> Result<()> {
        let greeting = format!("* OK {} IMAP4rev1 ready\r\n", self.config.hostname);
        self.stream.get_mut().write_all(greeting.as_bytes()).await?;

        loop {
            match self.process_one().await {
                Ok(SessionResult::Continue) => continue,
                Ok(SessionResult::Quit) => break,
                Err(e) => {
                    warn!(error = %e, "IMAP session terminated");
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

        match std::mem::replace(&mut self.pending, PendingContinuation::None) {
            PendingContinuation::None => {}
            PendingContinuation::Idle => return self.handle_idle_done(&line).await,
            pending => return self.handle_auth_continuation(pending, line).await,
        }

        if let Some(tag) = ImapCommand::is_idle(&line) {
            return self.handle_idle(tag).await;
        }

        let (tag, cmd) = match ImapCommand::parse(&line) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.tagged("*", &e.imap_kind().to_string(), &e.to_string()).await?;
                return Ok(SessionResult::Continue);
            }
        };

        match self.dispatch(&tag, cmd).await {
            Ok(result) => Ok(result),
            Err(e) => {
                self.tagged(&tag, e.imap_kind(), &e.to_string()).await?;
                Ok(SessionResult::Continue)
            }
        }
    }

    async fn dispatch(&mut self, tag: &str, cmd: ImapCommand) -> Result<SessionResult> {
        match cmd {
            ImapCommand::Capability => self.handle_capability(tag).await,
            ImapCommand::Id => self.handle_id(tag).await,
            ImapCommand::Noop => {
                self.tagged(tag, "OK", "NOOP completed").await?;
                Ok(SessionResult::Continue)
            }
            ImapCommand::Logout => self.handle_logout(tag).await,
            ImapCommand::Enable(caps) => self.handle_enable(tag, caps).await,
            ImapCommand::StartTls => self.handle_starttls(tag).await,
            ImapCommand::Authenticate { mechanism, initial } => {
                self.handle_authenticate(tag, mechanism, initial).await
            }
            ImapCommand::Login { username, password } => self.handle_login(tag, username, password).await,
            ImapCommand::Select { mailbox } => self.handle_select(tag, mailbox, false).await,
            ImapCommand::Examine { mailbox } => self.handle_select(tag, mailbox, true).await,
            ImapCommand::Create { mailbox } => self.handle_create(tag, mailbox).await,
            ImapCommand::Delete { mailbox } => self.handle_delete(tag, mailbox).await,
            ImapCommand::Rename { from, to } => self.handle_rename(tag, from, to).await,
            ImapCommand::Subscribe { mailbox } => self.handle_subscribe(tag, mailbox, true).await,
            ImapCommand::Unsubscribe { mailbox } => self.handle_subscribe(tag, mailbox, false).await,
            ImapCommand::List { reference, mailbox } => self.handle_list(tag, reference, mailbox, false).await,
            ImapCommand::Lsub { reference, mailbox } => self.handle_list(tag, reference, mailbox, true).await,
            ImapCommand::Status { mailbox, items } => self.handle_status(tag, mailbox, items).await,
            ImapCommand::Append { mailbox, flags, date, size } => {
                self.handle_append(tag, mailbox, flags, date, size).await
            }
            ImapCommand::Fetch { sequence, items, uid } => self.handle_fetch(tag, sequence, items, uid).await,
            ImapCommand::Search { criteria, uid } => self.handle_search(tag, criteria, uid).await,
            ImapCommand::Sort { keys, reverse_keys, criteria, uid } => {
                self.handle_sort(tag, keys, reverse_keys, criteria, uid).await
            }
            ImapCommand::Thread { algorithm, criteria, uid } => {
                self.handle_thread(tag, algorithm, criteria, uid).await
            }
            ImapCommand::Store { sequence, operation, silent, flags, uid } => {
                self.handle_store(tag, sequence, operation, silent, flags, uid).await
            }
            ImapCommand::Copy { sequence, mailbox, uid } => self.handle_copy(tag, sequence, mailbox, uid, false).await,
            ImapCommand::Move { sequence, mailbox, uid } => self.handle_copy(tag, sequence, mailbox, uid, true).await,
            ImapCommand::Expunge => self.handle_expunge(tag, true).await,
            ImapCommand::Close => self.handle_close(tag).await,
            ImapCommand::Done => Err(MailError::StateError("DONE without IDLE".to_string())),
        }
    }

    // ---- capability / housekeeping --------------------------------------

    async fn handle_capability(&mut self, tag: &str) -> Result<SessionResult> {
        self.untagged(&format!("CAPABILITY {CAPABILITY_STRING}")).await?;
        self.tagged(tag, "OK", "CAPABILITY completed").await?;
        Ok(SessionResult::Continue)
    }

    async fn handle_id(&mut self, tag: &str) -> Result<SessionResult> {
        self.untagged("ID NIL").await?;
        self.tagged(tag, "OK", "ID completed").await?;
        Ok(SessionResult::Continue)
    }

    async fn handle_enable(&mut self, tag: &str, caps: Vec<String>) -> Result<SessionResult> {
        if !caps.is_empty() {
            self.untagged(&format!("ENABLED {}", caps.join(" "))).await?;
        }
        self.tagged(tag, "OK", "ENABLE completed").await?;
        Ok(SessionResult::Continue)
    }

    async fn handle_logout(&mut self, tag: &str) -> Result<SessionResult> {
        self.untagged("BYE IMAP4rev1 server logging out").await?;
        self.tagged(tag, "OK", "LOGOUT completed").await?;
        Ok(SessionResult::Quit)
    }

    async fn handle_starttls(&mut self, tag: &str) -> Result<SessionResult> {
        let Some(tls) = self.config.tls.clone() else {
            self.tagged(tag, "NO", "TLS not available").await?;
            return Ok(SessionResult::Continue);
        };
        if self.stream.get_ref().is_encrypted() {
            return Err(MailError::StateError("already encrypted".to_string()));
        }
        if self.authenticated_user.is_some() {
            return Err(MailError::StateError("STARTTLS not allowed after authentication".to_string()));
        }
        self.tagged(tag, "OK", "Begin TLS negotiation now").await?;
        self.stream.get_mut().upgrade(&tls.acceptor).await?;
        info!("IMAP connection upgraded to TLS");
        Ok(SessionResult::Continue)
    }

    // ---- authentication --------------------------------------------------

    async fn handle_authenticate(
        &mut self,
        tag: &str,
        mechanism: String,
        initial: Option<String>,
    ) -> Result<SessionResult> {
        if self.state != SessionState::NotAuthenticated {
            return Err(MailError::StateError("already authenticated".to_string()));
        }
        self.last_tag = tag.to_string();
        match mechanism.to_uppercase().as_str() {
            "PLAIN" => match initial {
                Some(resp) => self.finish_plain_auth(tag, &resp).await,
                None => {
                    self.pending = PendingContinuation::AuthPlain;
                    self.reply_raw("+ \r\n").await?;
                    Ok(SessionResult::Continue)
                }
            },
            "LOGIN" => {
                self.pending = PendingContinuation::AuthLoginUser;
                self.reply_raw("+ VXNlcm5hbWU6\r\n").await?;
                Ok(SessionResult::Continue)
            }
            other => Err(MailError::SyntaxError(format!("unsupported AUTHENTICATE mechanism: {other}"))),
        }
    }

    async fn handle_auth_continuation(
        &mut self,
        pending: PendingContinuation,
        line: String,
    ) -> Result<SessionResult> {
        let tag = self.last_tag.clone();
        match pending {
            PendingContinuation::AuthPlain => self.finish_plain_auth(&tag, &line).await,
            PendingContinuation::AuthLoginUser => {
                let username = Authenticator::decode_login_credential(&line)?;
                self.pending = PendingContinuation::AuthLoginPassword(username);
                self.reply_raw("+ UGFzc3dvcmQ6\r\n").await?;
                Ok(SessionResult::Continue)
            }
            PendingContinuation::AuthLoginPassword(username) => {
                let password = Authenticator::decode_login_credential(&line)?;
                self.finish_auth(&tag, &username, &password).await
            }
            _ => unreachable!(),
        }
    }

    async fn finish_plain_auth(&mut self, tag: &str, resp: &str) -> Result<SessionResult> {
        let (username, password) = Authenticator::decode_plain_auth(resp)?;
        self.finish_auth(tag, &username, &password).await
    }

    async fn finish_auth(&mut self, tag: &str, username: &str, password: &str) -> Result<SessionResult> {
        if let Some(limiter) = self.config.rate_limiter.clone() {
            if !limiter.check_ip_limit(&self.client_ip, RateLimit::LoginAttempts).await {
                return Err(MailError::Transient("too many login attempts, try again later".to_string()));
            }
        }
        match self.config.authenticator.verify(username, password).await? {
            Some(outcome) => {
                self.authenticated_user = Some(outcome.username);
                self.state = SessionState::Authenticated;
                self.tagged(tag, "OK", "Authentication successful").await?;
                Ok(SessionResult::Continue)
            }
            None => Err(MailError::AuthFailed),
        }
    }

    async fn handle_login(&mut self, tag: &str, username: String, password: String) -> Result<SessionResult> {
        if self.state != SessionState::NotAuthenticated {
            return Err(MailError::StateError("already authenticated".to_string()));
        }
        if let Some(limiter) = self.config.rate_limiter.clone() {
            if !limiter.check_ip_limit(&self.client_ip, RateLimit::LoginAttempts).await {
                return Err(MailError::Transient("too many login attempts, try again later".to_string()));
            }
        }
        match self.config.authenticator.verify(&username, &password).await? {
            Some(outcome) => {
                self.authenticated_user = Some(outcome.username);
                self.state = SessionState::Authenticated;
                self.tagged(tag, "OK", "LOGIN completed").await?;
                Ok(SessionResult::Continue)
            }
            None => Err(MailError::AuthFailed),
        }
    }

    fn owner(&self) -> Result<String> {
        self.authenticated_user.clone().ok_or(MailError::AuthRequired)
    }

    // ---- mailbox selection -------------------------------------------------

    async fn handle_select(&mut self, tag: &str, mailbox: String, read_only: bool) -> Result<SessionResult> {
        if self.state == SessionState::NotAuthenticated {
            return Err(MailError::AuthRequired);
        }
        let owner = self.owner()?;
        let meta = self.config.store.ensure_folder(&owner, &mailbox).await?;
        let snapshot = self.config.store.list_folder(&owner, &mailbox).await?;

        let exists = snapshot.len();
        let recent = snapshot.iter().filter(|m| m.flags().recent).count();
        let first_unseen = snapshot.iter().position(|m| !m.flags().seen);

        self.untagged(&format!("{exists} EXISTS")).await?;
        self.untagged(&format!("{recent} RECENT")).await?;
        if let Some(idx) = first_unseen {
            self.untagged_ok(&format!("UNSEEN {}", idx + 1)).await?;
        }
        self.untagged_ok(&format!("UIDVALIDITY {}", meta.uid_validity)).await?;
        self.untagged_ok(&format!("UIDNEXT {}", meta.uid_next)).await?;
        self.untagged("FLAGS (\\Answered \\Flagged \\Deleted \\Seen \\Draft)").await?;
        self.untagged_ok("PERMANENTFLAGS (\\Answered \\Flagged \\Deleted \\Seen \\Draft)").await?;

        if !read_only {
            self.config.store.clear_recent(&owner, &mailbox).await?;
        }

        self.state = SessionState::Selected;
        self.selected = Some(SelectedMailbox {
            name: mailbox,
            read_only,
            snapshot,
            uid_validity: meta.uid_validity,
        });

        let qualifier = if read_only { "READ-ONLY" } else { "READ-WRITE" };
        self.tagged(tag, "OK", &format!("[{qualifier}] completed")).await?;
        Ok(SessionResult::Continue)
    }

    fn require_selected(&self) -> Result<&SelectedMailbox> {
        self.selected.as_ref().ok_or_else(|| MailError::StateError("no mailbox selected".to_string()))
    }

    async fn handle_create(&mut self, tag: &str, mailbox: String) -> Result<SessionResult> {
        let owner = self.owner()?;
        self.config.store.ensure_folder(&owner, &mailbox).await?;
        self.tagged(tag, "OK", "CREATE completed").await?;
        Ok(SessionResult::Continue)
    }

    async fn handle_delete(&mut self, tag: &str, mailbox: String) -> Result<SessionResult> {
        let owner = self.owner()?;
        if mailbox.eq_ignore_ascii_case("INBOX") {
            return Err(MailError::PolicyReject("INBOX cannot be deleted".to_string()));
        }
        self.config.store.delete_folder(&owner, &mailbox).await?;
        if self.selected.as_ref().map(|s| s.name == mailbox).unwrap_or(false) {
            self.selected = None;
            self.state = SessionState::Authenticated;
        }
        self.tagged(tag, "OK", "DELETE completed").await?;
        Ok(SessionResult::Continue)
    }

    async fn handle_rename(&mut self, tag: &str, from: String, to: String) -> Result<SessionResult> {
        let owner = self.owner()?;
        self.config.store.rename_folder(&owner, &from, &to).await?;
        self.tagged(tag, "OK", "RENAME completed").await?;
        Ok(SessionResult::Continue)
    }

    async fn handle_subscribe(&mut self, tag: &str, mailbox: String, subscribed: bool) -> Result<SessionResult> {
        let owner = self.owner()?;
        self.config.store.set_subscribed(&owner, &mailbox, subscribed).await?;
        let verb = if subscribed { "SUBSCRIBE" } else { "UNSUBSCRIBE" };
        self.tagged(tag, "OK", &format!("{verb} completed")).await?;
        Ok(SessionResult::Continue)
    }

    async fn handle_list(
        &mut self,
        tag: &str,
        reference: String,
        pattern: String,
        subscribed_only: bool,
    ) -> Result<SessionResult> {
        let owner = self.owner()?;
        let all = if subscribed_only {
            self.config.store.list_subscribed(&owner).await?
        } else {
            self.config.store.list_folders(&owner).await?
        };

        if pattern.is_empty() {
            self.untagged(r#"LIST (\Noselect) "/" """#).await?;
            self.tagged(tag, "OK", "LIST completed").await?;
            return Ok(SessionResult::Continue);
        }

        let full_pattern = format!("{reference}{pattern}");
        let verb = if subscribed_only { "LSUB" } else { "LIST" };
        for name in all {
            if !glob_matches(&full_pattern, &name) {
                continue;
            }
            let attrs = special_use_attrs(&name);
            self.untagged(&format!(r#"{verb} ({attrs}) "/" "{name}""#)).await?;
        }
        self.tagged(tag, "OK", &format!("{verb} completed")).await?;
        Ok(SessionResult::Continue)
    }

    async fn handle_status(&mut self, tag: &str, mailbox: String, items: Vec<String>) -> Result<SessionResult> {
        let owner = self.owner()?;
        let status = self.config.store.status(&owner, &mailbox).await?;
        let mut parts = Vec::new();
        for item in &items {
            let value = match item.as_str() {
                "MESSAGES" => status.messages,
                "RECENT" => status.recent,
                "UNSEEN" => status.unseen,
                "UIDNEXT" => status.uid_next,
                "UIDVALIDITY" => status.uid_validity,
                other => return Err(MailError::SyntaxError(format!("unknown STATUS item: {other}"))),
            };
            parts.push(format!("{item} {value}"));
        }
        self.untagged(&format!(r#"STATUS "{mailbox}" ({})"#, parts.join(" "))).await?;
        self.tagged(tag, "OK", "STATUS completed").await?;
        Ok(SessionResult::Continue)
    }

    // ---- APPEND -------------------------------------------------------------

    async fn handle_append(
        &mut self,
        tag: &str,
        mailbox: String,
        flag_names: Vec<String>,
        _date: Option<String>,
        size: usize,
    ) -> Result<SessionResult> {
        let owner = self.owner()?;
        self.reply_raw("+ Ready for literal data\r\n").await?;

        let mut raw = vec![0u8; size];
        self.stream.read_exact(&mut raw).await?;
        self.drain_literal_trailer().await?;

        let mut flags = Flags::default();
        flags.apply_store("add", &flag_names);

        let parsed = MimeParser::parse(&raw).ok();
        let new_msg = NewMessage {
            owner,
            folder: mailbox,
            raw,
            subject: parsed.as_ref().and_then(|p| p.headers.get("subject").cloned()),
            from_addr: parsed.as_ref().and_then(|p| p.headers.get("from").cloned()),
            to_addrs: Vec::new(),
            text_body: parsed.as_ref().and_then(|p| p.text_body.clone()),
            html_body: parsed.as_ref().and_then(|p| p.html_body.clone()),
            message_id: parsed.as_ref().and_then(|p| p.headers.get("message-id").cloned()),
            in_reply_to: parsed.as_ref().and_then(|p| p.headers.get("in-reply-to").cloned()),
            references: Vec::new(),
            flags,
            status: None,
        };
        let created = self.config.store.create_message(new_msg).await?;
        let meta = self
            .config
            .store
            .folder_meta(&created.owner, &created.folder)
            .await?
            .ok_or_else(|| MailError::NotFound("folder vanished after APPEND".to_string()))?;

        self.tagged(
            tag,
            "OK",
            &format!("[APPENDUID {} {}] APPEND completed", meta.uid_validity, created.uid),
        )
        .await?;
        Ok(SessionResult::Continue)
    }

    /// Consumes the CRLF that follows an APPEND literal's raw bytes.
    async fn drain_literal_trailer(&mut self) -> Result<()> {
        let mut byte = [0u8; 1];
        loop {
            self.stream.read_exact(&mut byte).await?;
            if byte[0] == b'\n' {
                break;
            }
        }
        Ok(())
    }

    // ---- FETCH --------------------------------------------------------------

    async fn handle_fetch(&mut self, tag: &str, sequence: String, items: String, uid: bool) -> Result<SessionResult> {
        let owner = self.owner()?;
        let folder = self.require_selected()?.name.clone();
        let targets = self.resolve_targets(&sequence, uid)?;
        let item_list = parse_fetch_items(&items);

        for (seq, msg) in targets {
            let line = self.build_fetch_response(&msg, seq, uid, &item_list);
            self.untagged(&line).await?;
            if item_list.iter().any(|i| i.eq_ignore_ascii_case("BODY[]") || i.to_uppercase().starts_with("BODY[HEADER") || i.eq_ignore_ascii_case("RFC822")) {
                let mut flags = msg.flags();
                if !flags.seen {
                    flags.seen = true;
                    self.config.store.update_flags(&owner, &folder, msg.uid, &flags).await?;
                    self.refresh_snapshot_entry(msg.uid, flags);
                }
            }
        }
        let verb = if uid { "UID FETCH" } else { "FETCH" };
        self.tagged(tag, "OK", &format!("{verb} completed")).await?;
        Ok(SessionResult::Continue)
    }

    fn build_fetch_response(&self, msg: &Message, seq: usize, uid_cmd: bool, items: &[String]) -> String {
        let parsed = MimeParser::parse(&msg.raw).ok();
        let mut parts = Vec::new();
        let mut want_uid = uid_cmd;

        for item in items {
            let upper = item.to_uppercase();
            match upper.as_str() {
                "UID" => want_uid = true,
                "FLAGS" => parts.push(format!("FLAGS ({})", msg.flags().to_imap_list())),
                "INTERNALDATE" => parts.push(format!(
                    "INTERNALDATE \"{}\"",
                    msg.internal_date.format("%d-%b-%Y %H:%M:%S %z")
                )),
                "RFC822.SIZE" => parts.push(format!("RFC822.SIZE {}", msg.size())),
                "ENVELOPE" => parts.push(format!("ENVELOPE {}", build_envelope(msg))),
                "BODY" | "BODYSTRUCTURE" => {
                    parts.push(format!("{upper} {}", build_bodystructure(msg, parsed.as_ref())))
                }
                "RFC822" => parts.push(format!("RFC822 {}", imap_literal(&msg.raw))),
                "RFC822.HEADER" => parts.push(format!("RFC822.HEADER {}", imap_literal(header_block(&msg.raw)))),
                "RFC822.TEXT" => parts.push(format!("RFC822.TEXT {}", imap_literal(body_block(&msg.raw)))),
                "BODY[]" | "BODY.PEEK[]" => parts.push(format!("BODY[] {}", imap_literal(&msg.raw))),
                other
                    if other.starts_with("BODY[HEADER.FIELDS") || other.starts_with("BODY.PEEK[HEADER.FIELDS") =>
                {
                    let names = extract_header_field_names(other);
                    let subset = header_fields_subset(&msg.raw, &names);
                    parts.push(format!(
                        "BODY[HEADER.FIELDS ({})] {}",
                        names.join(" "),
                        imap_literal(subset.as_bytes())
                    ));
                }
                "BODY[HEADER]" | "BODY.PEEK[HEADER]" => {
                    parts.push(format!("BODY[HEADER] {}", imap_literal(header_block(&msg.raw))));
                }
                "BODY[TEXT]" | "BODY.PEEK[TEXT]" => {
                    parts.push(format!("BODY[TEXT] {}", imap_literal(body_block(&msg.raw))));
                }
                "FAST" => {
                    parts.push(format!("FLAGS ({})", msg.flags().to_imap_list()));
                    parts.push(format!(
                        "INTERNALDATE \"{}\"",
                        msg.internal_date.format("%d-%b-%Y %H:%M:%S %z")
                    ));
                    parts.push(format!("RFC822.SIZE {}", msg.size()));
                }
                "ALL" | "FULL" => {
                    parts.push(format!("FLAGS ({})", msg.flags().to_imap_list()));
                    parts.push(format!(
                        "INTERNALDATE \"{}\"",
                        msg.internal_date.format("%d-%b-%Y %H:%M:%S %z")
                    ));
                    parts.push(format!("RFC822.SIZE {}", msg.size()));
                    parts.push(format!("ENVELOPE {}", build_envelope(msg)));
                }
                "" => {}
                _ => {}
            }
        }

        if want_uid {
            parts.insert(0, format!("UID {}", msg.uid));
        }

        format!("{seq} FETCH ({})", parts.join(" "))
    }

    fn refresh_snapshot_entry(&mut self, uid: i64, flags: Flags) {
        if let Some(selected) = &mut self.selected {
            if let Some(msg) = selected.snapshot.iter_mut().find(|m| m.uid == uid) {
                msg.flags_json = flags.to_json();
            }
        }
    }

    /// Resolves a sequence-set expression against the session's snapshot,
    /// returning `(sequence_number, message)` pairs in ascending order.
    fn resolve_targets(&self, sequence: &str, uid: bool) -> Result<Vec<(usize, Message)>> {
        let selected = self.require_selected()?;
        let mut out = Vec::new();
        for (idx, msg) in selected.snapshot.iter().enumerate() {
            let seq = idx + 1;
            let matched = if uid {
                search::matches_sequence_set(sequence, msg.uid as usize)
            } else {
                search::matches_sequence_set(sequence, seq)
            };
            if matched {
                out.push((seq, msg.clone()));
            }
        }
        Ok(out)
    }

    // ---- SEARCH / SORT / THREAD ---------------------------------------------

    async fn handle_search(&mut self, tag: &str, criteria: String, uid: bool) -> Result<SessionResult> {
        let parsed = SearchCriteria::parse(&criteria)?;
        let selected = self.require_selected()?;
        let first_unseen = selected.snapshot.iter().position(|m| !m.flags().seen).map(|i| i + 1);

        let mut matches = Vec::new();
        for (idx, msg) in selected.snapshot.iter().enumerate() {
            let seq = idx + 1;
            if parsed.matches(msg, seq, Some(seq) == first_unseen) {
                matches.push(if uid { msg.uid as usize } else { seq });
            }
        }

        let body = matches.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(" ");
        self.untagged(format!("SEARCH {body}").trim_end()).await?;
        let verb = if uid { "UID SEARCH" } else { "SEARCH" };
        self.tagged(tag, "OK", &format!("{verb} completed")).await?;
        Ok(SessionResult::Continue)
    }

    async fn handle_sort(
        &mut self,
        tag: &str,
        keys: Vec<String>,
        reverse_keys: Vec<bool>,
        criteria: String,
        uid: bool,
    ) -> Result<SessionResult> {
        let parsed = SearchCriteria::parse(&criteria)?;
        let selected = self.require_selected()?;
        let first_unseen = selected.snapshot.iter().position(|m| !m.flags().seen).map(|i| i + 1);

        let filtered: Vec<Message> = selected
            .snapshot
            .iter()
            .enumerate()
            .filter(|(idx, msg)| parsed.matches(msg, idx + 1, Some(idx + 1) == first_unseen))
            .map(|(_, msg)| msg.clone())
            .collect();

        let order = search::sort_messages(&filtered, &keys, &reverse_keys);
        let ids: Vec<String> = order
            .into_iter()
            .map(|i| {
                if uid {
                    filtered[i].uid.to_string()
                } else {
                    self.seq_of(filtered[i].uid).to_string()
                }
            })
            .collect();

        self.untagged(format!("SORT {}", ids.join(" ")).trim_end()).await?;
        let verb = if uid { "UID SORT" } else { "SORT" };
        self.tagged(tag, "OK", &format!("{verb} completed")).await?;
        Ok(SessionResult::Continue)
    }

    async fn handle_thread(
        &mut self,
        tag: &str,
        algorithm: ThreadAlgorithm,
        criteria: String,
        uid: bool,
    ) -> Result<SessionResult> {
        let parsed = SearchCriteria::parse(&criteria)?;
        let selected = self.require_selected()?;
        let first_unseen = selected.snapshot.iter().position(|m| !m.flags().seen).map(|i| i + 1);

        let filtered: Vec<Message> = selected
            .snapshot
            .iter()
            .enumerate()
            .filter(|(idx, msg)| parsed.matches(msg, idx + 1, Some(idx + 1) == first_unseen))
            .map(|(_, msg)| msg.clone())
            .collect();

        let groups = match algorithm {
            ThreadAlgorithm::OrderedSubject => search::thread_by_subject(&filtered),
            ThreadAlgorithm::References => search::thread_by_references(&filtered),
        };

        for group in groups {
            let ids: Vec<String> = group
                .into_iter()
                .map(|i| {
                    if uid {
                        filtered[i].uid.to_string()
                    } else {
                        self.seq_of(filtered[i].uid).to_string()
                    }
                })
                .collect();
            self.untagged(&format!("THREAD ({})", ids.join(" "))).await?;
        }
        let verb = if uid { "UID THREAD" } else { "THREAD" };
        self.tagged(tag, "OK", &format!("{verb} completed")).await?;
        Ok(SessionResult::Continue)
    }

    fn seq_of(&self, uid: i64) -> usize {
        self.selected
            .as_ref()
            .and_then(|s| s.snapshot.iter().position(|m| m.uid == uid))
            .map(|idx| idx + 1)
            .unwrap_or(0)
    }

    // ---- STORE ----------------------------------------------------------------

    async fn handle_store(
        &mut self,
        tag: &str,
        sequence: String,
        operation: StoreOperation,
        silent: bool,
        flag_names: Vec<String>,
        uid: bool,
    ) -> Result<SessionResult> {
        let owner = self.owner()?;
        let selected = self.require_selected()?;
        let read_only = selected.read_only;
        let folder = selected.name.clone();
        if read_only {
            self.tagged(tag, "NO", "mailbox is read-only").await?;
            return Ok(SessionResult::Continue);
        }
        let targets = self.resolve_targets(&sequence, uid)?;

        let op_name = match operation {
            StoreOperation::Add => "add",
            StoreOperation::Remove => "remove",
            StoreOperation::Replace => "replace",
        };

        for (seq, msg) in targets {
            let mut flags = msg.flags();
            flags.apply_store(op_name, &flag_names);
            self.config.store.update_flags(&owner, &folder, msg.uid, &flags).await?;
            self.refresh_snapshot_entry(msg.uid, flags.clone());
            if !silent {
                let mut prefix = String::new();
                if uid {
                    prefix.push_str(&format!("UID {} ", msg.uid));
                }
                self.untagged(&format!("{seq} FETCH ({}FLAGS ({}))", prefix, flags.to_imap_list())).await?;
            }
        }
        let verb = if uid { "UID STORE" } else { "STORE" };
        self.tagged(tag, "OK", &format!("{verb} completed")).await?;
        Ok(SessionResult::Continue)
    }

    // ---- COPY / MOVE ------------------------------------------------------------

    async fn handle_copy(
        &mut self,
        tag: &str,
        sequence: String,
        dest: String,
        uid: bool,
        is_move: bool,
    ) -> Result<SessionResult> {
        let owner = self.owner()?;
        let folder = self.require_selected()?.name.clone();
        if self.config.store.folder_meta(&owner, &dest).await?.is_none() {
            return Err(MailError::Transient(format!("[TRYCREATE] no such mailbox: {dest}")));
        }
        let targets = self.resolve_targets(&sequence, uid)?;

        let mut src_uids = Vec::new();
        let mut dst_uids = Vec::new();
        for (_, msg) in &targets {
            let copy = self.config.store.copy_message(&owner, &folder, msg.uid, &dest).await?;
            src_uids.push(msg.uid.to_string());
            dst_uids.push(copy.uid.to_string());
            if is_move {
                self.config.store.delete_message(&owner, &folder, msg.uid).await?;
            }
        }

        if is_move {
            self.refresh_selected_snapshot(&owner, &folder).await?;
        }

        let dest_validity = self
            .config
            .store
            .folder_meta(&owner, &dest)
            .await?
            .map(|m| m.uid_validity)
            .unwrap_or(0);
        let verb = if uid {
            if is_move {
                "UID MOVE"
            } else {
                "UID COPY"
            }
        } else if is_move {
            "MOVE"
        } else {
            "COPY"
        };
        self.tagged(
            tag,
            "OK",
            &format!(
                "[COPYUID {} {} {}] {verb} completed",
                dest_validity,
                src_uids.join(","),
                dst_uids.join(",")
            ),
        )
        .await?;
        Ok(SessionResult::Continue)
    }

    async fn refresh_selected_snapshot(&mut self, owner: &str, folder: &str) -> Result<()> {
        let snapshot = self.config.store.list_folder(owner, folder).await?;
        if let Some(selected) = &mut self.selected {
            selected.snapshot = snapshot;
        }
        Ok(())
    }

    // ---- EXPUNGE / CLOSE ------------------------------------------------------

    async fn handle_expunge(&mut self, tag: &str, emit: bool) -> Result<SessionResult> {
        let owner = self.owner()?;
        let selected = self.require_selected()?;
        let read_only = selected.read_only;
        let folder = selected.name.clone();

        if read_only {
            if emit {
                self.tagged(tag, "NO", "mailbox is read-only").await?;
            }
            // CLOSE's implicit expunge is a no-op on a read-only mailbox.
            return Ok(SessionResult::Continue);
        }

        let seqs = self.config.store.expunge(&owner, &folder).await?;
        if emit {
            for seq in &seqs {
                self.untagged(&format!("{seq} EXPUNGE")).await?;
            }
        }
        self.refresh_selected_snapshot(&owner, &folder).await?;
        if emit {
            self.tagged(tag, "OK", "EXPUNGE completed").await?;
        }
        Ok(SessionResult::Continue)
    }

    async fn handle_close(&mut self, tag: &str) -> Result<SessionResult> {
        self.require_selected()?;
        // CLOSE silently expunges without emitting untagged EXPUNGE, and
        // skips the expunge entirely on a read-only mailbox.
        self.handle_expunge(tag, false).await?;
        self.selected = None;
        self.state = SessionState::Authenticated;
        self.tagged(tag, "OK", "CLOSE completed").await?;
        Ok(SessionResult::Continue)
    }

    // ---- IDLE -------------------------------------------------------------------

    async fn handle_idle(&mut self, tag: String) -> Result<SessionResult> {
        self.require_selected()?;
        self.last_tag = tag;
        self.pending = PendingContinuation::Idle;
        self.reply_raw("+ idling\r\n").await?;

        let owner = self.owner()?;
        let folder = self.require_selected()?.name.clone();
        let mut changes = self.config.store.subscribe();

        loop {
            tokio::select! {
                line = self.read_line() => {
                    let Some(line) = line? else { return Ok(SessionResult::Quit) };
                    if line.trim().eq_ignore_ascii_case("DONE") {
                        self.pending = PendingContinuation::None;
                        let tag = std::mem::take(&mut self.last_tag);
                        self.tagged(&tag, "OK", "IDLE terminated").await?;
                        return Ok(SessionResult::Continue);
                    }
                }
                event = changes.recv() => {
                    let Ok(event) = event else { continue };
                    if event.owner != owner || event.folder != folder {
                        continue;
                    }
                    self.push_idle_update(&owner, &folder, event.kind).await?;
                }
            }
        }
    }

    async fn handle_idle_done(&mut self, line: &str) -> Result<SessionResult> {
        // Reached only if `handle_idle`'s inner select loop exited without
        // consuming DONE itself (defensive fallback, not normally hit).
        if line.trim().eq_ignore_ascii_case("DONE") {
            let tag = std::mem::take(&mut self.last_tag);
            self.tagged(&tag, "OK", "IDLE terminated").await?;
        }
        Ok(SessionResult::Continue)
    }

    async fn push_idle_update(&mut self, owner: &str, folder: &str, kind: ChangeKind) -> Result<()> {
        match kind {
            ChangeKind::Inserted | ChangeKind::Expunged => {
                self.refresh_selected_snapshot(owner, folder).await?;
                let exists = self.selected.as_ref().map(|s| s.snapshot.len()).unwrap_or(0);
                self.untagged(&format!("{exists} EXISTS")).await?;
            }
            ChangeKind::FlagsUpdated => {
                self.refresh_selected_snapshot(owner, folder).await?;
            }
            ChangeKind::QueueReady => {}
        }
        Ok(())
    }

    // ---- wire helpers -----------------------------------------------------------

    async fn untagged(&mut self, body: impl AsRef<str>) -> Result<()> {
        let line = format!("* {}\r\n", body.as_ref());
        self.stream.get_mut().write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn untagged_ok(&mut self, inner: &str) -> Result<()> {
        self.untagged(format!("OK [{inner}]")).await
    }

    async fn tagged(&mut self, tag: &str, kind: &str, message: &str) -> Result<()> {
        let line = format!("{tag} {kind} {message}\r\n");
        self.stream.get_mut().write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn reply_raw(&mut self, line: &str) -> Result<()> {
        self.stream.get_mut().write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<Option<String>> {
        let result = timeout(COMMAND_TIMEOUT, self.read_raw_line())
            .await
            .map_err(|_| MailError::Transient("command timed out".to_string()))??;
        if let Some(line) = &result {
            if let Some(tag) = line.split_whitespace().next() {
                if !tag.is_empty() {
                    self.last_tag = tag.to_string();
                }
            }
        }
        Ok(result)
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

// ---- free helper functions -----------------------------------------------------

/// Splits a FETCH items string into individual item tokens, respecting
/// bracket nesting so `BODY[HEADER.FIELDS (FROM TO)]` stays one token.
fn parse_fetch_items(items: &str) -> Vec<String> {
    let trimmed = items.trim();
    let inner = if trimmed.starts_with('(') && trimmed.ends_with(')') {
        &trimmed[1..trimmed.len() - 1]
    } else {
        trimmed
    };

    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    for c in inner.chars() {
        match c {
            '[' | '(' => {
                depth += 1;
                current.push(c);
            }
            ']' | ')' => {
                depth -= 1;
                current.push(c);
            }
            c if c.is_whitespace() && depth == 0 => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn extract_header_field_names(item: &str) -> Vec<String> {
    let start = item.find('(').map(|i| i + 1).unwrap_or(0);
    let end = item.rfind(')').unwrap_or(item.len());
    if start >= end {
        return Vec::new();
    }
    item[start..end].split_whitespace().map(str::to_uppercase).collect()
}

fn header_fields_subset(raw: &[u8], names: &[String]) -> String {
    let text = String::from_utf8_lossy(raw);
    let header_block = text.split("\r\n\r\n").next().unwrap_or("");
    let mut out = String::new();
    for line in header_block.lines() {
        if let Some((name, _)) = line.split_once(':') {
            if names.iter().any(|n| n.eq_ignore_ascii_case(name.trim())) {
                out.push_str(line);
                out.push_str("\r\n");
            }
        }
    }
    out.push_str("\r\n");
    out
}

fn header_block(raw: &[u8]) -> &[u8] {
    let marker = b"\r\n\r\n";
    match raw.windows(4).position(|w| w == marker) {
        Some(pos) => &raw[..pos + 2],
        None => raw,
    }
}

fn body_block(raw: &[u8]) -> &[u8] {
    let marker = b"\r\n\r\n";
    match raw.windows(4).position(|w| w == marker) {
        Some(pos) => &raw[pos + 4..],
        None => b"",
    }
}

/// IMAP literal framing: `{n}\r\n<n bytes>`.
fn imap_literal(data: &[u8]) -> String {
    format!("{{{}}}\r\n{}", data.len(), String::from_utf8_lossy(data))
}

fn quote_or_nil(value: Option<&str>) -> String {
    match value {
        Some(v) => format!("\"{}\"", v.replace('\\', "\\\\").replace('"', "\\\"")),
        None => "NIL".to_string(),
    }
}

/// Builds one ENVELOPE address-list entry: `((name adl mailbox host))`.
fn envelope_address(addr: &str) -> String {
    if addr.is_empty() {
        return "NIL".to_string();
    }
    let (mailbox, host) = addr.split_once('@').unwrap_or((addr, ""));
    format!("((NIL NIL {} {}))", quote_or_nil(Some(mailbox)), quote_or_nil(Some(host)))
}

/// RFC 3501 §7.4.2 ENVELOPE structure.
fn build_envelope(msg: &Message) -> String {
    let date = quote_or_nil(Some(&msg.internal_date.to_rfc2822()));
    let subject = quote_or_nil(msg.subject.as_deref());
    let from = msg.from_addr.as_deref().map(envelope_address).unwrap_or_else(|| "NIL".to_string());
    let to_addrs = msg.to_addrs();
    let to = if to_addrs.is_empty() {
        "NIL".to_string()
    } else {
        format!("({})", to_addrs.iter().map(|a| envelope_address(a).trim_matches(|c| c == '(' || c == ')').to_string()).collect::<Vec<_>>().join(" "))
    };
    let message_id = quote_or_nil(msg.message_id.as_deref());
    let in_reply_to = quote_or_nil(msg.in_reply_to.as_deref());

    format!(
        "({date} {subject} {from} {from} NIL {to} NIL NIL {in_reply_to} {message_id})"
    )
}

/// Simplified BODYSTRUCTURE: one entry per MIME part when the message is
/// multipart, otherwise a single TEXT/PLAIN (or TEXT/HTML) part.
fn build_bodystructure(msg: &Message, parsed: Option<&crate::mime::ParsedEmail>) -> String {
    let Some(parsed) = parsed else {
        return format!(
            r#"("TEXT" "PLAIN" ("CHARSET" "UTF-8") NIL NIL "7BIT" {} {})"#,
            msg.size(),
            msg.text_body.as_deref().unwrap_or("").lines().count().max(1)
        );
    };

    if parsed.attachments.is_empty() {
        let (subtype, body) = if parsed.html_body.is_some() {
            ("HTML", parsed.html_body.as_deref().unwrap_or(""))
        } else {
            ("PLAIN", parsed.text_body.as_deref().unwrap_or(""))
        };
        return format!(
            r#"("TEXT" "{subtype}" ("CHARSET" "UTF-8") NIL NIL "7BIT" {} {})"#,
            body.len(),
            body.lines().count().max(1)
        );
    }

    let mut parts = Vec::new();
    if let Some(text) = &parsed.text_body {
        parts.push(format!(r#"("TEXT" "PLAIN" ("CHARSET" "UTF-8") NIL NIL "7BIT" {} {})"#, text.len(), text.lines().count().max(1)));
    }
    for att in &parsed.attachments {
        let main_type = att.content_type.split('/').next().unwrap_or("APPLICATION").to_uppercase();
        let sub_type = att.content_type.split('/').nth(1).unwrap_or("OCTET-STREAM").to_uppercase();
        parts.push(format!(
            r#"("{main_type}" "{sub_type}" ("NAME" {}) NIL NIL "BASE64" {})"#,
            quote_or_nil(att.filename.as_deref()),
            att.body.len()
        ));
    }
    format!("({} \"MIXED\")", parts.join(""))
}

/// `%`-and-`*` LIST/LSUB glob matching, with `/` as the hierarchy
/// delimiter (`*` matches across delimiters, `%` does not).
fn glob_matches(pattern: &str, name: &str) -> bool {
    fn matches(pattern: &[char], name: &[char]) -> bool {
        match pattern.first() {
            None => name.is_empty(),
            Some('*') => {
                (0..=name.len()).any(|i| matches(&pattern[1..], &name[i..]))
            }
            Some('%') => {
                for i in 0..=name.len() {
                    if name[..i].contains(&'/') {
                        break;
                    }
                    if matches(&pattern[1..], &name[i..]) {
                        return true;
                    }
                }
                false
            }
            Some(c) => name.first() == Some(c) && matches(&pattern[1..], &name[1..]),
        }
    }
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    matches(&p, &n)
}

fn special_use_attrs(name: &str) -> &'static str {
    match name {
        "Sent" => "\\Sent",
        "Drafts" => "\\Drafts",
        "Trash" => "\\Trash",
        "Spam" => "\\Junk",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_fetch_items_respects_bracket_nesting() {
        let items = "(UID FLAGS BODY[HEADER.FIELDS (FROM TO)])";
        let parsed = parse_fetch_items(items);
        assert_eq!(parsed, vec!["UID", "FLAGS", "BODY[HEADER.FIELDS (FROM TO)]"]);
    }

    #[test]
    fn glob_star_matches_across_hierarchy() {
        assert!(glob_matches("*", "INBOX/Work"));
        assert!(glob_matches("INBOX*", "INBOX/Work"));
    }

    #[test]
    fn glob_percent_stops_at_delimiter() {
        assert!(glob_matches("%", "INBOX"));
        assert!(!glob_matches("%", "INBOX/Work"));
    }

    #[test]
    fn special_use_attrs_cover_standard_folders() {
        assert_eq!(special_use_attrs("Trash"), "\\Trash");
        assert_eq!(special_use_attrs("INBOX"), "");
    }

    use std::time::Duration;

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader as TokioBufReader};
    use tokio::net::TcpListener;
    use tokio::time::sleep;

    async fn read_line(reader: &mut TokioBufReader<tokio::net::tcp::OwnedReadHalf>) -> String {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        line
    }

    async fn write_line(writer: &mut tokio::net::tcp::OwnedWriteHalf, line: &str) {
        writer.write_all(format!("{line}\r\n").as_bytes()).await.unwrap();
    }

    /// EXAMINE opens read-only; STORE against that selection must be
    /// refused, and the flags in the mailstore must stay untouched.
    #[tokio::test]
    async fn store_on_an_examined_mailbox_is_refused() {
        let store = Mailstore::connect("sqlite::memory:").await.unwrap();
        let authenticator = Arc::new(Authenticator::new(store.clone()));
        authenticator.add_user("alice@example.test", "hunter2").await.unwrap();
        store
            .create_message(NewMessage {
                owner: "alice@example.test".to_string(),
                folder: "INBOX".to_string(),
                raw: b"Subject: hi\r\n\r\nbody\r\n".to_vec(),
                subject: Some("hi".to_string()),
                from_addr: Some("bob@example.test".to_string()),
                to_addrs: vec!["alice@example.test".to_string()],
                text_body: Some("body".to_string()),
                html_body: None,
                message_id: None,
                in_reply_to: None,
                references: vec![],
                flags: Flags::default(),
                status: None,
            })
            .await
            .unwrap();

        let session_config = ImapSessionConfig {
            hostname: "mail.example.test".to_string(),
            tls: None,
            store: store.clone(),
            authenticator,
            rate_limiter: None,
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, peer) = listener.accept().await.unwrap();
            let session = ImapSession::new(MailStream::Plain(socket), peer.ip(), session_config);
            let _ = session.handle().await;
        });
        sleep(Duration::from_millis(50)).await;

        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = TokioBufReader::new(read_half);
        let _greeting = read_line(&mut reader).await;

        write_line(&mut write_half, "a1 LOGIN alice@example.test hunter2").await;
        let response = read_line(&mut reader).await;
        assert!(response.starts_with("a1 OK"), "login failed: {response}");

        write_line(&mut write_half, "a2 EXAMINE INBOX").await;
        loop {
            if read_line(&mut reader).await.starts_with("a2 OK") {
                break;
            }
        }

        write_line(&mut write_half, "a3 STORE 1 +FLAGS (\\Seen)").await;
        let response = read_line(&mut reader).await;
        assert!(response.starts_with("a3 NO"), "expected refusal, got: {response}");

        let messages = store.list_folder("alice@example.test", "INBOX").await.unwrap();
        assert!(!messages[0].flags().seen, "read-only STORE must not mutate flags");
    }
}
