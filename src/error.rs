use thiserror::Error;

/// Error taxonomy shared by all three protocol front ends. Session code
/// converts one of these to a response code/tag at the command boundary;
/// it never constructs a raw protocol reply inline.
#[derive(Error, Debug)]
pub enum MailError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("syntax error: {0}")]
    SyntaxError(String),

    #[error("command not valid in current state: {0}")]
    StateError(String),

    #[error("authentication required")]
    AuthRequired,

    #[error("authentication failed")]
    AuthFailed,

    #[error("policy rejection: {0}")]
    PolicyReject(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("remote SMTP error ({code}): {message}")]
    RemoteSmtp { code: u16, message: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("DNS lookup failed: {0}")]
    DnsLookup(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl MailError {
    /// True for a `RemoteSmtp` carrying a 4xx (retryable) response.
    pub fn is_transient_remote(&self) -> bool {
        matches!(self, MailError::RemoteSmtp { code, .. } if (400..500).contains(code))
            || matches!(self, MailError::Transient(_))
    }

    /// SMTP reply code this error maps to, per the §7 taxonomy.
    pub fn smtp_code(&self) -> u16 {
        match self {
            MailError::SyntaxError(_) => 501,
            MailError::StateError(_) => 503,
            MailError::AuthRequired => 530,
            MailError::AuthFailed => 535,
            MailError::PolicyReject(_) => 550,
            MailError::Transient(_) => 451,
            MailError::NotFound(_) => 550,
            MailError::RemoteSmtp { code, .. } => *code,
            MailError::Io(_) => 421,
            _ => 451,
        }
    }

    /// IMAP response kind ("NO" vs "BAD") this error maps to.
    pub fn imap_kind(&self) -> &'static str {
        match self {
            MailError::SyntaxError(_) | MailError::StateError(_) | MailError::Protocol(_) => "BAD",
            _ => "NO",
        }
    }
}

pub type Result<T> = std::result::Result<T, MailError>;
