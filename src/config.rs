use crate::error::{MailError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub ports: PortsConfig,
    pub tls: TlsConfig,
    pub database: DatabaseConfig,
    pub limits: LimitsConfig,
    pub spam: SpamConfig,
    pub webhook: WebhookConfig,
    pub ip_selection: IpSelectionConfig,
    pub dkim: DkimConfig,
    pub forward_25: ForwardConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub domain: String,
    pub hostname: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PortsConfig {
    pub smtp25: u16,
    pub smtp465: u16,
    pub smtp587: u16,
    pub lmtp24: u16,
    pub lmtp1024: u16,
    pub imap143: u16,
    pub imap993: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    pub mode: TlsMode,
    pub key_path: Option<String>,
    pub cert_path: Option<String>,
    pub ca_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    pub max_email_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SpamConfig {
    pub enabled: bool,
    pub inbound_enabled: bool,
    pub outbound_enabled: bool,
    pub host: String,
    pub port: u16,
    pub timeout_secs: u64,
    pub reject_threshold: f64,
    pub greylist_threshold: f64,
    pub add_header_threshold: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebhookConfig {
    pub enabled: bool,
    pub success_url: Option<String>,
    pub failure_url: Option<String>,
    pub timeout_secs: u64,
    pub retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IpSelectionConfig {
    pub enabled: bool,
    pub api_url: Option<String>,
    pub timeout_secs: u64,
    pub retries: u32,
    pub fallback_ip: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DkimConfig {
    pub enabled: bool,
    pub plugin_path: Option<String>,
    pub selector: String,
    pub headers_to_sign: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ForwardConfig {
    pub enabled: bool,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub secure: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    pub submission_required: bool,
    pub relay_allowed_for_authed: bool,
    pub max_retries: u32,
    pub worker_concurrency: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(MailError::Io)?;
        toml::from_str(&content).map_err(MailError::Toml)
    }

    pub fn default() -> Self {
        Self {
            server: ServerConfig {
                domain: "example.test".to_string(),
                hostname: "mail.example.test".to_string(),
            },
            ports: PortsConfig {
                smtp25: 2525,
                smtp465: 4650,
                smtp587: 5870,
                lmtp24: 2400,
                lmtp1024: 10240,
                imap143: 1430,
                imap993: 9930,
            },
            tls: TlsConfig {
                mode: TlsMode::Disabled,
                key_path: None,
                cert_path: None,
                ca_path: None,
            },
            database: DatabaseConfig {
                url: "sqlite://mail.db".to_string(),
            },
            limits: LimitsConfig {
                max_email_size: 10 * 1024 * 1024,
            },
            spam: SpamConfig {
                enabled: false,
                inbound_enabled: true,
                outbound_enabled: false,
                host: "127.0.0.1".to_string(),
                port: 11333,
                timeout_secs: 10,
                reject_threshold: 15.0,
                greylist_threshold: 6.0,
                add_header_threshold: 4.0,
            },
            webhook: WebhookConfig {
                enabled: false,
                success_url: None,
                failure_url: None,
                timeout_secs: 10,
                retries: 5,
            },
            ip_selection: IpSelectionConfig {
                enabled: false,
                api_url: None,
                timeout_secs: 5,
                retries: 1,
                fallback_ip: None,
            },
            dkim: DkimConfig {
                enabled: false,
                plugin_path: None,
                selector: "default".to_string(),
                headers_to_sign: vec![
                    "from".to_string(),
                    "to".to_string(),
                    "subject".to_string(),
                    "date".to_string(),
                    "message-id".to_string(),
                ],
            },
            forward_25: ForwardConfig {
                enabled: false,
                host: None,
                port: None,
                username: None,
                password: None,
                secure: false,
            },
            auth: AuthConfig {
                submission_required: true,
                relay_allowed_for_authed: true,
                max_retries: 3,
                worker_concurrency: 10,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_all_ports() {
        let cfg = Config::default();
        assert_eq!(cfg.ports.smtp25, 2525);
        assert_eq!(cfg.auth.max_retries, 3);
    }

    #[test]
    fn round_trips_through_toml() {
        let cfg = Config::default();
        let serialized = toml::to_string(&cfg).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.server.domain, cfg.server.domain);
        assert_eq!(parsed.dkim.headers_to_sign, cfg.dkim.headers_to_sign);
    }
}
