//! Pluggable outbound source-IP selector. Given sender/recipient/subject
//! metadata, an external collaborator may pick the local IPv4 address a
//! send-queue worker binds from before connecting to a remote MX. Results
//! are cached for 5 minutes keyed by (sender domain, recipient domain) so
//! a burst of messages to the same pair of domains doesn't hit the
//! collaborator on every attempt.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::IpSelectionConfig;

const CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Serialize)]
pub struct IpSelectionContext<'a> {
    pub sender: &'a str,
    pub recipients: &'a [String],
    pub subject: Option<&'a str>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl<'a> IpSelectionContext<'a> {
    fn cache_key(&self) -> (String, String) {
        let sender_domain = domain_of(self.sender);
        let recipient_domain = self
            .recipients
            .first()
            .map(|r| domain_of(r))
            .unwrap_or_default();
        (sender_domain, recipient_domain)
    }
}

fn domain_of(addr: &str) -> String {
    addr.rsplit('@').next().unwrap_or(addr).to_lowercase()
}

#[async_trait::async_trait]
pub trait IpSelector: Send + Sync {
    async fn select(&self, ctx: &IpSelectionContext<'_>) -> Option<Ipv4Addr>;
}

/// Selector that never overrides the default bind address. Used when
/// IP selection is disabled in configuration.
pub struct NoopSelector;

#[async_trait::async_trait]
impl IpSelector for NoopSelector {
    async fn select(&self, _ctx: &IpSelectionContext<'_>) -> Option<Ipv4Addr> {
        None
    }
}

#[derive(Debug, Deserialize)]
struct SelectResponse {
    ip: Option<Ipv4Addr>,
}

struct CacheEntry {
    ip: Option<Ipv4Addr>,
    inserted_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() > CACHE_TTL
    }
}

/// HTTP-backed IP selector. Calls the configured collaborator endpoint
/// with (sender, recipients, subject, timestamp) and expects
/// `{"ip": "203.0.113.4"}` or `{"ip": null}` in response.
pub struct HttpIpSelector {
    client: reqwest::Client,
    config: IpSelectionConfig,
    cache: Arc<RwLock<HashMap<(String, String), CacheEntry>>>,
}

impl HttpIpSelector {
    pub fn new(config: IpSelectionConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        HttpIpSelector {
            client,
            config,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn fallback(&self) -> Option<Ipv4Addr> {
        self.config
            .fallback_ip
            .as_deref()
            .and_then(|s| s.parse().ok())
    }

    async fn query(&self, ctx: &IpSelectionContext<'_>) -> Option<Ipv4Addr> {
        let Some(url) = self.config.api_url.clone() else {
            return self.fallback();
        };

        let mut attempt = 0;
        loop {
            let result = self.client.post(&url).json(ctx).send().await;
            match result {
                Ok(response) if response.status().is_success() => {
                    return match response.json::<SelectResponse>().await {
                        Ok(body) => body.ip,
                        Err(e) => {
                            warn!(error = %e, "ip selection response was not valid JSON");
                            self.fallback()
                        }
                    };
                }
                Ok(response) => {
                    warn!(status = %response.status(), "ip selection endpoint returned non-success");
                }
                Err(e) => {
                    warn!(error = %e, attempt, "ip selection request failed");
                }
            }
            if attempt >= self.config.retries {
                return self.fallback();
            }
            attempt += 1;
        }
    }
}

#[async_trait::async_trait]
impl IpSelector for HttpIpSelector {
    async fn select(&self, ctx: &IpSelectionContext<'_>) -> Option<Ipv4Addr> {
        if !self.config.enabled {
            return None;
        }

        let key = ctx.cache_key();

        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(&key) {
                if !entry.is_expired() {
                    debug!(sender_domain = %key.0, recipient_domain = %key.1, "ip selection cache hit");
                    return entry.ip;
                }
            }
        }

        let ip = self.query(ctx).await;

        let mut cache = self.cache.write().await;
        cache.retain(|_, v| !v.is_expired());
        cache.insert(
            key,
            CacheEntry {
                ip,
                inserted_at: Instant::now(),
            },
        );
        ip
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> IpSelectionConfig {
        IpSelectionConfig {
            enabled: true,
            api_url: None,
            timeout_secs: 5,
            retries: 1,
            fallback_ip: Some("203.0.113.9".to_string()),
        }
    }

    fn ctx<'a>(sender: &'a str, recipients: &'a [String]) -> IpSelectionContext<'a> {
        IpSelectionContext {
            sender,
            recipients,
            subject: Some("hello"),
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn cache_key_is_domain_pair_not_full_address() {
        let recipients = vec!["bob@recipient.test".to_string()];
        let c = ctx("alice@sender.test", &recipients);
        assert_eq!(
            c.cache_key(),
            ("sender.test".to_string(), "recipient.test".to_string())
        );
    }

    #[tokio::test]
    async fn disabled_selector_never_calls_out() {
        let mut cfg = config();
        cfg.enabled = false;
        let selector = HttpIpSelector::new(cfg);
        let recipients = vec!["bob@recipient.test".to_string()];
        let result = selector.select(&ctx("alice@sender.test", &recipients)).await;
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn no_api_url_falls_back_to_configured_ip() {
        let selector = HttpIpSelector::new(config());
        let recipients = vec!["bob@recipient.test".to_string()];
        let result = selector.select(&ctx("alice@sender.test", &recipients)).await;
        assert_eq!(result, Some("203.0.113.9".parse().unwrap()));
    }

    #[tokio::test]
    async fn repeated_selection_is_served_from_cache() {
        let selector = HttpIpSelector::new(config());
        let recipients = vec!["bob@recipient.test".to_string()];
        let c = ctx("alice@sender.test", &recipients);
        let first = selector.select(&c).await;
        let second = selector.select(&c).await;
        assert_eq!(first, second);
        assert_eq!(selector.cache.read().await.len(), 1);
    }

    #[tokio::test]
    async fn noop_selector_always_returns_none() {
        let recipients = vec!["bob@recipient.test".to_string()];
        let c = ctx("alice@sender.test", &recipients);
        let result = NoopSelector.select(&c).await;
        assert_eq!(result, None);
    }
}
