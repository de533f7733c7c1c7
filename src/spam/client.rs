//! External spam-scanning collaborator (§4.8). `scan()` calls out to a
//! network scanner (e.g. rspamd) over HTTP; any failure is fail-open —
//! the caller gets `Verdict::accept_clean()` back and the error is
//! logged, never propagated as a delivery failure.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::config::SpamConfig;

#[derive(Debug, Clone, Serialize)]
pub struct ScanContext {
    pub sender: String,
    pub recipients: Vec<String>,
    pub ip: String,
    pub helo: String,
    pub hostname: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictAction {
    Accept,
    AddHeader,
    Greylist,
    Reject,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Verdict {
    #[serde(default)]
    pub action: Option<VerdictAction>,
    pub score: f64,
    #[serde(default = "default_required_score")]
    pub required_score: f64,
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub messages: Vec<String>,
}

fn default_required_score() -> f64 {
    0.0
}

impl Verdict {
    pub fn accept_clean() -> Self {
        Verdict {
            action: Some(VerdictAction::Accept),
            score: 0.0,
            required_score: 0.0,
            symbols: Vec::new(),
            messages: Vec::new(),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait SpamScannerClient: Send + Sync {
    async fn scan(&self, raw: &[u8], ctx: &ScanContext) -> Verdict;
    async fn health_check(&self) -> bool;
}

/// HTTP-backed scanner client with a bounded keep-alive pool (§5: ≤50
/// sockets) and a 10s default timeout.
pub struct HttpSpamScanner {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSpamScanner {
    pub fn new(config: &SpamConfig) -> Self {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(50)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        HttpSpamScanner {
            client,
            endpoint: format!("http://{}:{}/checkv2", config.host, config.port),
        }
    }
}

#[async_trait::async_trait]
impl SpamScannerClient for HttpSpamScanner {
    async fn scan(&self, raw: &[u8], ctx: &ScanContext) -> Verdict {
        let result = self
            .client
            .post(&self.endpoint)
            .header("Ip", &ctx.ip)
            .header("Helo", &ctx.helo)
            .header("From", &ctx.sender)
            .body(raw.to_vec())
            .send()
            .await;

        match result {
            Ok(response) => match response.json::<Verdict>().await {
                Ok(verdict) => verdict,
                Err(e) => {
                    warn!(error = %e, "spam scanner returned an unparseable response, accepting clean");
                    Verdict::accept_clean()
                }
            },
            Err(e) => {
                error!(error = %e, "spam scanner unreachable, failing open");
                Verdict::accept_clean()
            }
        }
    }

    async fn health_check(&self) -> bool {
        self.client
            .get(&self.endpoint)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_clean_has_zero_score() {
        let v = Verdict::accept_clean();
        assert_eq!(v.score, 0.0);
        assert_eq!(v.action, Some(VerdictAction::Accept));
    }
}
