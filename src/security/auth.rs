//! Authentication collaborator shared by SMTP AUTH and IMAP LOGIN/AUTHENTICATE.
//!
//! # Supported mechanisms
//! - PLAIN (RFC 4616)
//! - LOGIN (common but not standardized)
//!
//! Passwords are hashed with Argon2 and compared in constant time by the
//! `argon2` crate's verifier. Credentials live in the mailstore's
//! `mailboxes` table rather than a separate users table — one schema for
//! "who can log in" and "who owns these messages".

use std::sync::Arc;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tracing::{debug, info, warn};

use crate::error::{MailError, Result};
use crate::mailstore::Mailstore;

/// SMTP/IMAP authentication mechanisms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMechanism {
    Plain,
    Login,
}

impl AuthMechanism {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PLAIN" => Some(Self::Plain),
            "LOGIN" => Some(Self::Login),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
        }
    }
}

/// Result of a successful `verify` call per §6's Auth plug-in contract.
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub username: String,
}

#[derive(Clone)]
pub struct Authenticator {
    store: Arc<Mailstore>,
}

impl Authenticator {
    pub fn new(store: Arc<Mailstore>) -> Self {
        Self { store }
    }

    /// Create a mailbox account with an Argon2-hashed password.
    pub async fn add_user(&self, username: &str, password: &str) -> Result<()> {
        info!(username, "provisioning mailbox");
        let password_hash = self.hash_password(password)?;
        self.store.create_mailbox(username, &password_hash).await?;
        Ok(())
    }

    pub fn hash_password(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::default();
        let password_hash = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| MailError::Config(format!("failed to hash password: {e}")))?;
        Ok(password_hash.to_string())
    }

    /// §6 plug-in contract: `verify(username, password) -> {ok, username} | error`.
    pub async fn verify(&self, username: &str, password: &str) -> Result<Option<AuthOutcome>> {
        debug!(username, "authentication attempt");
        let Some(stored_hash) = self.store.password_hash(username).await? else {
            warn!(username, "authentication failed: no such mailbox");
            return Ok(None);
        };

        let parsed_hash = PasswordHash::new(&stored_hash).map_err(|_| MailError::AuthFailed)?;
        let verified = Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok();

        if verified {
            info!(username, "authentication succeeded");
            Ok(Some(AuthOutcome {
                username: username.to_string(),
            }))
        } else {
            warn!(username, "authentication failed: bad password");
            Ok(None)
        }
    }

    pub async fn user_exists(&self, username: &str) -> Result<bool> {
        self.store.mailbox_exists(username).await
    }

    /// PLAIN carries `\0username\0password`, base64-encoded.
    pub fn decode_plain_auth(auth_data: &str) -> Result<(String, String)> {
        let decoded = BASE64
            .decode(auth_data.trim())
            .map_err(|e| MailError::SyntaxError(format!("invalid base64: {e}")))?;

        let parts: Vec<&str> = std::str::from_utf8(&decoded)
            .map_err(|e| MailError::SyntaxError(format!("invalid utf-8: {e}")))?
            .split('\0')
            .collect();

        if parts.len() != 3 {
            return Err(MailError::SyntaxError("invalid PLAIN auth format".to_string()));
        }

        Ok((parts[1].to_string(), parts[2].to_string()))
    }

    /// LOGIN sends username and password as separate base64-encoded lines.
    pub fn decode_login_credential(credential: &str) -> Result<String> {
        let decoded = BASE64
            .decode(credential.trim())
            .map_err(|e| MailError::SyntaxError(format!("invalid base64: {e}")))?;
        String::from_utf8(decoded).map_err(|e| MailError::SyntaxError(format!("invalid utf-8: {e}")))
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(self.store.pool()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::SqlitePool;

    async fn test_auth() -> Authenticator {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let store = Arc::new(Mailstore::from_pool(pool).await.unwrap());
        Authenticator::new(store)
    }

    #[tokio::test]
    async fn add_and_verify_user() {
        let auth = test_auth().await;
        auth.add_user("alice@x.test", "hunter2").await.unwrap();

        let ok = auth.verify("alice@x.test", "hunter2").await.unwrap();
        assert!(ok.is_some());

        let bad = auth.verify("alice@x.test", "wrong").await.unwrap();
        assert!(bad.is_none());
    }

    #[tokio::test]
    async fn verify_unknown_user_does_not_disclose_which_field_was_wrong() {
        let auth = test_auth().await;
        let result = auth.verify("nobody@x.test", "whatever").await.unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn decode_plain_auth_splits_identity_and_password() {
        let auth_data = BASE64.encode(b"\0user@example.com\0password123");
        let (username, password) = Authenticator::decode_plain_auth(&auth_data).unwrap();
        assert_eq!(username, "user@example.com");
        assert_eq!(password, "password123");
    }

    #[test]
    fn decode_login_credential_roundtrips() {
        let encoded = BASE64.encode(b"user@example.com");
        let decoded = Authenticator::decode_login_credential(&encoded).unwrap();
        assert_eq!(decoded, "user@example.com");
    }

    #[test]
    fn auth_mechanism_from_str_is_case_insensitive() {
        assert_eq!(AuthMechanism::from_str("PLAIN"), Some(AuthMechanism::Plain));
        assert_eq!(AuthMechanism::from_str("plain"), Some(AuthMechanism::Plain));
        assert_eq!(AuthMechanism::from_str("LOGIN"), Some(AuthMechanism::Login));
        assert_eq!(AuthMechanism::from_str("unknown"), None);
    }
}
