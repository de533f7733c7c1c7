use std::sync::Arc;

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::{MailError, Result};

use super::model::{
    ChangeEvent, ChangeKind, FolderMeta, Flags, IncomingArchive, MailboxStatus, Message,
    NewMessage, QueueStatus,
};

const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// Relational mailstore shared by every session. UID allocation is
/// serialized per (owner, folder) through a SQLite transaction so
/// concurrent APPEND/COPY/delivery never hand out the same UID (I1/I2).
pub struct Mailstore {
    pool: SqlitePool,
    changes: broadcast::Sender<ChangeEvent>,
}

impl Mailstore {
    pub async fn connect(database_url: &str) -> Result<Arc<Self>> {
        let pool = SqlitePool::connect(database_url).await?;
        let store = Self::from_pool(pool).await?;
        Ok(Arc::new(store))
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let (tx, _rx) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let store = Mailstore { pool, changes: tx };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mailboxes (
                username TEXT PRIMARY KEY,
                password_hash TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS folders (
                owner TEXT NOT NULL,
                name TEXT NOT NULL,
                uid_validity INTEGER NOT NULL,
                uid_next INTEGER NOT NULL DEFAULT 1,
                subscribed INTEGER NOT NULL DEFAULT 1,
                PRIMARY KEY (owner, name)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                folder TEXT NOT NULL,
                uid INTEGER NOT NULL,
                modseq INTEGER NOT NULL,
                internal_date TEXT NOT NULL,
                raw BLOB NOT NULL,
                subject TEXT,
                from_addr TEXT,
                to_addrs_json TEXT NOT NULL DEFAULT '[]',
                text_body TEXT,
                html_body TEXT,
                message_id TEXT,
                in_reply_to TEXT,
                references_json TEXT NOT NULL DEFAULT '[]',
                flags_json TEXT NOT NULL,
                status TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                last_attempt TEXT,
                sent_at TEXT,
                send_attempts_json TEXT NOT NULL DEFAULT '[]',
                final_error TEXT,
                UNIQUE(owner, folder, uid)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_owner_folder ON messages(owner, folder, uid)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_status ON messages(status, last_attempt)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS incoming_archive (
                id TEXT PRIMARY KEY,
                sender TEXT,
                recipients_json TEXT NOT NULL DEFAULT '[]',
                raw BLOB NOT NULL,
                source TEXT NOT NULL,
                received_at TEXT NOT NULL,
                headers_json TEXT NOT NULL DEFAULT '{}'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }

    fn notify(&self, owner: &str, folder: &str, kind: ChangeKind) {
        let _ = self.changes.send(ChangeEvent {
            owner: owner.to_string(),
            folder: folder.to_string(),
            kind,
        });
    }

    // ---- mailbox accounts -------------------------------------------------

    pub async fn create_mailbox(&self, username: &str, password_hash: &str) -> Result<()> {
        sqlx::query("INSERT INTO mailboxes (username, password_hash, created_at) VALUES (?, ?, ?)")
            .bind(username)
            .bind(password_hash)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mailbox_exists(&self, username: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM mailboxes WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn password_hash(&self, username: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT password_hash FROM mailboxes WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>("password_hash")))
    }

    // ---- folders / UIDVALIDITY --------------------------------------------

    /// Returns the folder's metadata, minting a fresh UIDVALIDITY on first
    /// creation (§9 open question: never the constant `1`).
    pub async fn ensure_folder(&self, owner: &str, name: &str) -> Result<FolderMeta> {
        if let Some(meta) = self.folder_meta(owner, name).await? {
            return Ok(meta);
        }
        let uid_validity = Utc::now().timestamp();
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO folders (owner, name, uid_validity, uid_next) VALUES (?, ?, ?, 1)",
        )
        .bind(owner)
        .bind(name)
        .bind(uid_validity)
        .execute(&self.pool)
        .await?;
        if inserted.rows_affected() == 0 {
            // Lost a race with another session creating the same folder.
            return self
                .folder_meta(owner, name)
                .await?
                .ok_or_else(|| MailError::NotFound(format!("folder {name}")));
        }
        Ok(FolderMeta {
            owner: owner.to_string(),
            name: name.to_string(),
            uid_validity,
            uid_next: 1,
        })
    }

    pub async fn folder_meta(&self, owner: &str, name: &str) -> Result<Option<FolderMeta>> {
        let row = sqlx::query_as::<_, FolderMeta>(
            "SELECT owner, name, uid_validity, uid_next FROM folders WHERE owner = ? AND name = ?",
        )
        .bind(owner)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_folders(&self, owner: &str) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT folder FROM messages WHERE owner = ? ORDER BY folder")
            .bind(owner)
            .fetch_all(&self.pool)
            .await?;
        let mut names: Vec<String> = rows.iter().map(|r| r.get::<String, _>("folder")).collect();
        for standard in ["INBOX", "Sent", "Drafts", "Trash", "Spam"] {
            if !names.iter().any(|n| n == standard) {
                names.push(standard.to_string());
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Renames a folder in place, carrying its messages with it. The
    /// destination keeps the source's UIDVALIDITY/UIDNEXT (RFC 3501
    /// doesn't require minting a new one on RENAME).
    pub async fn rename_folder(&self, owner: &str, old_name: &str, new_name: &str) -> Result<()> {
        self.ensure_folder(owner, old_name).await?;
        sqlx::query("UPDATE folders SET name = ? WHERE owner = ? AND name = ?")
            .bind(new_name)
            .bind(owner)
            .bind(old_name)
            .execute(&self.pool)
            .await?;
        sqlx::query("UPDATE messages SET folder = ? WHERE owner = ? AND folder = ?")
            .bind(new_name)
            .bind(owner)
            .bind(old_name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Deletes a folder and every message in it.
    pub async fn delete_folder(&self, owner: &str, name: &str) -> Result<()> {
        sqlx::query("DELETE FROM messages WHERE owner = ? AND folder = ?")
            .bind(owner)
            .bind(name)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM folders WHERE owner = ? AND name = ?")
            .bind(owner)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_subscribed(&self, owner: &str, name: &str, subscribed: bool) -> Result<()> {
        self.ensure_folder(owner, name).await?;
        sqlx::query("UPDATE folders SET subscribed = ? WHERE owner = ? AND name = ?")
            .bind(subscribed)
            .bind(owner)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_subscribed(&self, owner: &str) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT name FROM folders WHERE owner = ? AND subscribed = 1")
            .bind(owner)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get::<String, _>("name")).collect())
    }

    async fn alloc_uid(&self, owner: &str, folder: &str) -> Result<(i64, i64)> {
        let mut tx = self.pool.begin().await?;
        // Ensure the folder row exists within the same transaction so the
        // very first message into a brand-new folder still gets a minted
        // UIDVALIDITY.
        let existing = sqlx::query_as::<_, FolderMeta>(
            "SELECT owner, name, uid_validity, uid_next FROM folders WHERE owner = ? AND name = ?",
        )
        .bind(owner)
        .bind(folder)
        .fetch_optional(&mut *tx)
        .await?;

        let (uid_validity, uid_next) = match existing {
            Some(meta) => (meta.uid_validity, meta.uid_next),
            None => {
                let uid_validity = Utc::now().timestamp();
                sqlx::query(
                    "INSERT INTO folders (owner, name, uid_validity, uid_next) VALUES (?, ?, ?, 1)",
                )
                .bind(owner)
                .bind(folder)
                .bind(uid_validity)
                .execute(&mut *tx)
                .await?;
                (uid_validity, 1)
            }
        };

        sqlx::query("UPDATE folders SET uid_next = uid_next + 1 WHERE owner = ? AND name = ?")
            .bind(owner)
            .bind(folder)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok((uid_next, uid_validity))
    }

    // ---- messages -----------------------------------------------------

    pub async fn create_message(&self, msg: NewMessage) -> Result<Message> {
        let (uid, _uid_validity) = self.alloc_uid(&msg.owner, &msg.folder).await?;
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO messages (
                id, owner, folder, uid, modseq, internal_date, raw, subject, from_addr,
                to_addrs_json, text_body, html_body, message_id, in_reply_to, references_json,
                flags_json, status, retry_count, last_attempt, sent_at, send_attempts_json, final_error
            ) VALUES (?,?,?,?,1,?,?,?,?,?,?,?,?,?,?,?,?,0,NULL,NULL,'[]',NULL)
            "#,
        )
        .bind(&id)
        .bind(&msg.owner)
        .bind(&msg.folder)
        .bind(uid)
        .bind(now.to_rfc3339())
        .bind(&msg.raw)
        .bind(&msg.subject)
        .bind(&msg.from_addr)
        .bind(serde_json::to_string(&msg.to_addrs).unwrap_or_else(|_| "[]".to_string()))
        .bind(&msg.text_body)
        .bind(&msg.html_body)
        .bind(&msg.message_id)
        .bind(&msg.in_reply_to)
        .bind(serde_json::to_string(&msg.references).unwrap_or_else(|_| "[]".to_string()))
        .bind(msg.flags.to_json())
        .bind(msg.status.map(|s| s.to_string()))
        .execute(&self.pool)
        .await?;

        self.notify(&msg.owner, &msg.folder, ChangeKind::Inserted);
        if msg.status == Some(QueueStatus::Pending) {
            self.notify(&msg.owner, &msg.folder, ChangeKind::QueueReady);
        }

        self.get_by_id(&id)
            .await?
            .ok_or_else(|| MailError::NotFound("message vanished after insert".to_string()))
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<Message>> {
        let row = sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Snapshot of a folder ordered by UID ascending; index+1 is the IMAP
    /// sequence number for the session that took this snapshot at SELECT.
    pub async fn list_folder(&self, owner: &str, folder: &str) -> Result<Vec<Message>> {
        let rows = sqlx::query_as::<_, Message>(
            "SELECT * FROM messages WHERE owner = ? AND folder = ? ORDER BY uid ASC",
        )
        .bind(owner)
        .bind(folder)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_by_uid(&self, owner: &str, folder: &str, uid: i64) -> Result<Option<Message>> {
        let row = sqlx::query_as::<_, Message>(
            "SELECT * FROM messages WHERE owner = ? AND folder = ? AND uid = ?",
        )
        .bind(owner)
        .bind(folder)
        .bind(uid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn status(&self, owner: &str, folder: &str) -> Result<MailboxStatus> {
        let meta = self.ensure_folder(owner, folder).await?;
        let messages = self.list_folder(owner, folder).await?;
        let recent = messages.iter().filter(|m| m.flags().recent).count() as i64;
        let unseen = messages.iter().filter(|m| !m.flags().seen).count() as i64;
        Ok(MailboxStatus {
            messages: messages.len() as i64,
            recent,
            unseen,
            uid_next: meta.uid_next,
            uid_validity: meta.uid_validity,
        })
    }

    pub async fn update_flags(&self, owner: &str, folder: &str, uid: i64, flags: &Flags) -> Result<()> {
        sqlx::query(
            "UPDATE messages SET flags_json = ?, modseq = modseq + 1 WHERE owner = ? AND folder = ? AND uid = ?",
        )
        .bind(flags.to_json())
        .bind(owner)
        .bind(folder)
        .bind(uid)
        .execute(&self.pool)
        .await?;
        self.notify(owner, folder, ChangeKind::FlagsUpdated);
        Ok(())
    }

    /// Clears `recent` on every message in the folder; called on the first
    /// SELECT READ-WRITE of a session (I3).
    pub async fn clear_recent(&self, owner: &str, folder: &str) -> Result<()> {
        let messages = self.list_folder(owner, folder).await?;
        for msg in messages {
            let mut flags = msg.flags();
            if flags.recent {
                flags.recent = false;
                self.update_flags(owner, folder, msg.uid, &flags).await?;
            }
        }
        Ok(())
    }

    /// Deletes every message flagged `\Deleted`; returns their UIDs in the
    /// descending sequence order EXPUNGE must emit them in.
    pub async fn expunge(&self, owner: &str, folder: &str) -> Result<Vec<i64>> {
        let messages = self.list_folder(owner, folder).await?;
        let mut deleted_uids = Vec::new();
        for (idx, msg) in messages.iter().enumerate() {
            if msg.flags().deleted {
                deleted_uids.push((idx, msg.uid));
            }
        }
        for (_, uid) in &deleted_uids {
            sqlx::query("DELETE FROM messages WHERE owner = ? AND folder = ? AND uid = ?")
                .bind(owner)
                .bind(folder)
                .bind(uid)
                .execute(&self.pool)
                .await?;
        }
        if !deleted_uids.is_empty() {
            self.notify(owner, folder, ChangeKind::Expunged);
        }
        // Emit in descending sequence-number order per §4.6.
        let mut seqs: Vec<i64> = deleted_uids.iter().map(|(idx, _)| *idx as i64 + 1).collect();
        seqs.sort_unstable_by(|a, b| b.cmp(a));
        Ok(seqs)
    }

    pub async fn copy_message(
        &self,
        owner: &str,
        src_folder: &str,
        uid: i64,
        dest_folder: &str,
    ) -> Result<Message> {
        let src = self
            .get_by_uid(owner, src_folder, uid)
            .await?
            .ok_or_else(|| MailError::NotFound(format!("uid {uid} in {src_folder}")))?;
        let new_msg = NewMessage {
            owner: owner.to_string(),
            folder: dest_folder.to_string(),
            raw: src.raw.clone(),
            subject: src.subject.clone(),
            from_addr: src.from_addr.clone(),
            to_addrs: src.to_addrs(),
            text_body: src.text_body.clone(),
            html_body: src.html_body.clone(),
            message_id: src.message_id.clone(),
            in_reply_to: src.in_reply_to.clone(),
            references: src.references(),
            flags: src.flags(),
            status: None,
        };
        self.create_message(new_msg).await
    }

    pub async fn delete_message(&self, owner: &str, folder: &str, uid: i64) -> Result<()> {
        sqlx::query("DELETE FROM messages WHERE owner = ? AND folder = ? AND uid = ?")
            .bind(owner)
            .bind(folder)
            .bind(uid)
            .execute(&self.pool)
            .await?;
        self.notify(owner, folder, ChangeKind::Expunged);
        Ok(())
    }

    pub async fn append_archive(&self, archive: IncomingArchive) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO incoming_archive (id, sender, recipients_json, raw, source, received_at, headers_json)
            VALUES (?,?,?,?,?,?,?)
            "#,
        )
        .bind(&archive.id)
        .bind(&archive.sender)
        .bind(&archive.recipients_json)
        .bind(&archive.raw)
        .bind(&archive.source)
        .bind(archive.received_at.to_rfc3339())
        .bind(&archive.headers_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ---- send queue -----------------------------------------------------

    pub async fn get_pending(&self, now: chrono::DateTime<Utc>, limit: i64) -> Result<Vec<Message>> {
        let rows = sqlx::query_as::<_, Message>(
            r#"
            SELECT * FROM messages
            WHERE status = 'pending'
            ORDER BY internal_date ASC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        // Retry-delay filtering happens in the worker, which knows the
        // configured schedule; this just bounds the candidate set.
        let _ = now;
        Ok(rows)
    }

    /// Appends every attempt in `new_attempts` (one per MX host tried
    /// across every recipient of this pass) and sets the resulting
    /// status/retry_count in a single update.
    pub async fn mark_attempts(
        &self,
        id: &str,
        new_status: QueueStatus,
        retry_count: i64,
        new_attempts: &[super::model::SendAttempt],
        final_error: Option<&str>,
    ) -> Result<()> {
        let msg = self
            .get_by_id(id)
            .await?
            .ok_or_else(|| MailError::NotFound(format!("message {id}")))?;
        let mut attempts = msg.send_attempts();
        attempts.extend_from_slice(new_attempts);
        let attempts_json = serde_json::to_string(&attempts).unwrap_or_else(|_| "[]".to_string());
        let sent_at = if new_status == QueueStatus::Sent {
            Some(Utc::now().to_rfc3339())
        } else {
            None
        };

        sqlx::query(
            r#"
            UPDATE messages SET
                status = ?, retry_count = ?, last_attempt = ?, sent_at = COALESCE(?, sent_at),
                send_attempts_json = ?, final_error = ?
            WHERE id = ?
            "#,
        )
        .bind(new_status.to_string())
        .bind(retry_count)
        .bind(Utc::now().to_rfc3339())
        .bind(sent_at)
        .bind(attempts_json)
        .bind(final_error)
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.notify(&msg.owner, &msg.folder, ChangeKind::FlagsUpdated);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailstore::model::NewMessage;

    async fn test_store() -> Mailstore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        Mailstore::from_pool(pool).await.unwrap()
    }

    fn sample(owner: &str, folder: &str) -> NewMessage {
        NewMessage {
            owner: owner.to_string(),
            folder: folder.to_string(),
            raw: b"Subject: hi\r\n\r\nbody\r\n".to_vec(),
            subject: Some("hi".to_string()),
            from_addr: Some("a@x.test".to_string()),
            to_addrs: vec!["b@y.test".to_string()],
            text_body: Some("body".to_string()),
            html_body: None,
            message_id: Some("<1@x.test>".to_string()),
            in_reply_to: None,
            references: vec![],
            flags: Flags::default(),
            status: None,
        }
    }

    #[tokio::test]
    async fn uids_are_strictly_increasing_per_owner() {
        let store = test_store().await;
        let m1 = store.create_message(sample("alice", "INBOX")).await.unwrap();
        let m2 = store.create_message(sample("alice", "INBOX")).await.unwrap();
        let m3 = store.create_message(sample("alice", "INBOX")).await.unwrap();
        assert!(m1.uid < m2.uid);
        assert!(m2.uid < m3.uid);
    }

    #[tokio::test]
    async fn uidvalidity_is_not_the_constant_one() {
        let store = test_store().await;
        store.create_message(sample("alice", "INBOX")).await.unwrap();
        let meta = store.folder_meta("alice", "INBOX").await.unwrap().unwrap();
        assert_ne!(meta.uid_validity, 1);
    }

    #[tokio::test]
    async fn expunge_only_removes_deleted_and_descends() {
        let store = test_store().await;
        let m1 = store.create_message(sample("bob", "INBOX")).await.unwrap();
        let m2 = store.create_message(sample("bob", "INBOX")).await.unwrap();
        let mut flags = m2.flags();
        flags.deleted = true;
        store.update_flags("bob", "INBOX", m2.uid, &flags).await.unwrap();

        let seqs = store.expunge("bob", "INBOX").await.unwrap();
        assert_eq!(seqs, vec![2]);

        let remaining = store.list_folder("bob", "INBOX").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].uid, m1.uid);
    }

    #[tokio::test]
    async fn copy_message_gets_a_fresh_uid_in_destination() {
        let store = test_store().await;
        let original = store.create_message(sample("carl", "INBOX")).await.unwrap();
        let copy = store
            .copy_message("carl", "INBOX", original.uid, "Archive")
            .await
            .unwrap();
        assert_eq!(copy.folder, "Archive");
        assert_ne!(copy.id, original.id);
    }

    #[tokio::test]
    async fn status_is_scoped_to_the_named_folder() {
        let store = test_store().await;
        store.create_message(sample("dee", "INBOX")).await.unwrap();
        store.create_message(sample("dee", "Sent")).await.unwrap();
        let status = store.status("dee", "INBOX").await.unwrap();
        assert_eq!(status.messages, 1);
    }
}
