use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Per-message flag set. `keywords` holds any client-defined flag that
/// isn't one of the system flags below (RFC 3501 §2.3.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flags {
    pub seen: bool,
    pub answered: bool,
    pub flagged: bool,
    pub deleted: bool,
    pub draft: bool,
    pub recent: bool,
    pub keywords: Vec<String>,
}

impl Default for Flags {
    fn default() -> Self {
        Flags {
            seen: false,
            answered: false,
            flagged: false,
            deleted: false,
            draft: false,
            recent: true,
            keywords: Vec::new(),
        }
    }
}

impl Flags {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn from_json(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_default()
    }

    /// IMAP-formatted flag list, e.g. `\Seen \Flagged foo`.
    pub fn to_imap_list(&self) -> String {
        let mut parts = Vec::new();
        if self.seen {
            parts.push("\\Seen".to_string());
        }
        if self.answered {
            parts.push("\\Answered".to_string());
        }
        if self.flagged {
            parts.push("\\Flagged".to_string());
        }
        if self.deleted {
            parts.push("\\Deleted".to_string());
        }
        if self.draft {
            parts.push("\\Draft".to_string());
        }
        if self.recent {
            parts.push("\\Recent".to_string());
        }
        parts.extend(self.keywords.iter().cloned());
        parts.join(" ")
    }

    /// Apply a STORE mutation. `op` is one of `replace`, `add`, `remove`.
    pub fn apply_store(&mut self, op: &str, names: &[String]) {
        match op {
            "replace" => {
                *self = Flags {
                    seen: false,
                    answered: false,
                    flagged: false,
                    deleted: false,
                    draft: false,
                    recent: self.recent,
                    keywords: Vec::new(),
                };
                for name in names {
                    self.set_named(name, true);
                }
            }
            "add" => {
                for name in names {
                    self.set_named(name, true);
                }
            }
            "remove" => {
                for name in names {
                    self.set_named(name, false);
                }
            }
            _ => {}
        }
    }

    fn set_named(&mut self, name: &str, value: bool) {
        match name.to_ascii_lowercase().as_str() {
            "\\seen" => self.seen = value,
            "\\answered" => self.answered = value,
            "\\flagged" => self.flagged = value,
            "\\deleted" => self.deleted = value,
            "\\draft" => self.draft = value,
            "\\recent" => self.recent = value,
            other => {
                if value {
                    if !self.keywords.iter().any(|k| k.eq_ignore_ascii_case(other)) {
                        self.keywords.push(name.to_string());
                    }
                } else {
                    self.keywords.retain(|k| !k.eq_ignore_ascii_case(other));
                }
            }
        }
    }
}

/// Outbound send-queue status. Terminal states are `Sent` and
/// `FailedPermanent` (I5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Sent,
    Failed,
    FailedPermanent,
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Sent => "sent",
            QueueStatus::Failed => "failed",
            QueueStatus::FailedPermanent => "failed_permanent",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendAttempt {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub response: Option<String>,
    pub error: Option<String>,
}

/// The primary storage unit: one row per recipient delivery, or one row
/// per outbound submission. `owner`+`uid` is unique and UID is never
/// reused within an owner's lifetime (I1/I2).
#[derive(Debug, Clone, FromRow)]
pub struct Message {
    pub id: String,
    pub owner: String,
    pub folder: String,
    pub uid: i64,
    pub modseq: i64,
    pub internal_date: DateTime<Utc>,
    pub raw: Vec<u8>,
    pub subject: Option<String>,
    pub from_addr: Option<String>,
    pub to_addrs_json: String,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub references_json: String,
    pub flags_json: String,
    pub status: Option<QueueStatus>,
    pub retry_count: i64,
    pub last_attempt: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub send_attempts_json: String,
    pub final_error: Option<String>,
}

impl Message {
    pub fn flags(&self) -> Flags {
        Flags::from_json(&self.flags_json)
    }

    pub fn to_addrs(&self) -> Vec<String> {
        serde_json::from_str(&self.to_addrs_json).unwrap_or_default()
    }

    pub fn references(&self) -> Vec<String> {
        serde_json::from_str(&self.references_json).unwrap_or_default()
    }

    pub fn send_attempts(&self) -> Vec<SendAttempt> {
        serde_json::from_str(&self.send_attempts_json).unwrap_or_default()
    }

    pub fn size(&self) -> usize {
        self.raw.len()
    }
}

/// Field set used when persisting a fresh message (the DB assigns
/// uid/modseq/internal_date).
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub owner: String,
    pub folder: String,
    pub raw: Vec<u8>,
    pub subject: Option<String>,
    pub from_addr: Option<String>,
    pub to_addrs: Vec<String>,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub flags: Flags,
    pub status: Option<QueueStatus>,
}

/// Independent delivery-provenance archive, kept even when no owning
/// mailbox exists (I8).
#[derive(Debug, Clone, FromRow)]
pub struct IncomingArchive {
    pub id: String,
    pub sender: Option<String>,
    pub recipients_json: String,
    pub raw: Vec<u8>,
    pub source: String,
    pub received_at: DateTime<Utc>,
    pub headers_json: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct FolderMeta {
    pub owner: String,
    pub name: String,
    pub uid_validity: i64,
    pub uid_next: i64,
}

#[derive(Debug, Clone)]
pub struct MailboxStatus {
    pub messages: i64,
    pub recent: i64,
    pub unseen: i64,
    pub uid_next: i64,
    pub uid_validity: i64,
}

/// Pushed to `Mailstore::subscribe` listeners (IMAP IDLE, queue worker).
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub owner: String,
    pub folder: String,
    pub kind: ChangeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Inserted,
    FlagsUpdated,
    Expunged,
    QueueReady,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_store_replace_preserves_recent() {
        let mut flags = Flags {
            recent: true,
            ..Flags::default()
        };
        flags.apply_store("replace", &["\\Seen".to_string(), "\\Flagged".to_string()]);
        assert!(flags.seen);
        assert!(flags.flagged);
        assert!(flags.recent);
        assert!(!flags.answered);
    }

    #[test]
    fn apply_store_add_keyword_is_idempotent() {
        let mut flags = Flags::default();
        flags.apply_store("add", &["Junk".to_string()]);
        flags.apply_store("add", &["Junk".to_string()]);
        assert_eq!(flags.keywords, vec!["Junk".to_string()]);
    }

    #[test]
    fn imap_list_formats_system_flags() {
        let flags = Flags {
            seen: true,
            deleted: true,
            recent: false,
            ..Flags::default()
        };
        assert_eq!(flags.to_imap_list(), "\\Seen \\Deleted");
    }
}
