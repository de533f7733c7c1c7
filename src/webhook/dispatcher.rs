//! Posts a JSON payload to the configured success/failure URL after a
//! send attempt reaches a terminal-or-transient outcome. Delivery
//! failure of the webhook itself never alters the Message's status —
//! every error here is logged and swallowed.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, warn};

use crate::config::WebhookConfig;
use crate::mailstore::{Message, SendAttempt};

#[derive(Debug, Serialize)]
pub struct EmailSummary {
    pub id: String,
    pub sender: Option<String>,
    pub recipients: Vec<String>,
    pub subject: Option<String>,
    pub status: String,
    pub retry_count: i64,
}

#[derive(Debug, Serialize)]
pub struct SuccessPayload {
    pub event: &'static str,
    pub timestamp: DateTime<Utc>,
    pub email: EmailSummary,
    pub last_attempt: Option<SendAttempt>,
}

#[derive(Debug, Serialize)]
pub struct FailurePayload {
    pub event: &'static str,
    pub timestamp: DateTime<Utc>,
    pub email: EmailSummary,
    pub attempts: Vec<SendAttempt>,
    pub is_permanent: bool,
}

impl EmailSummary {
    pub fn from_message(msg: &Message) -> Self {
        EmailSummary {
            id: msg.id.clone(),
            sender: msg.from_addr.clone(),
            recipients: msg.to_addrs(),
            subject: msg.subject.clone(),
            status: msg.status.map(|s| s.to_string()).unwrap_or_default(),
            retry_count: msg.retry_count,
        }
    }
}

#[derive(Clone)]
pub struct WebhookDispatcher {
    client: reqwest::Client,
    config: WebhookConfig,
}

impl WebhookDispatcher {
    pub fn new(config: WebhookConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        WebhookDispatcher { client, config }
    }

    pub async fn dispatch_success(&self, msg: &Message) {
        if !self.config.enabled {
            return;
        }
        let Some(url) = self.config.success_url.clone() else {
            return;
        };
        let payload = SuccessPayload {
            event: "success",
            timestamp: Utc::now(),
            email: EmailSummary::from_message(msg),
            last_attempt: msg.send_attempts().last().cloned(),
        };
        self.post_with_retry(url, &payload).await;
    }

    pub async fn dispatch_failure(&self, msg: &Message, is_permanent: bool) {
        if !self.config.enabled {
            return;
        }
        let Some(url) = self.config.failure_url.clone() else {
            return;
        };
        let payload = FailurePayload {
            event: "failure",
            timestamp: Utc::now(),
            email: EmailSummary::from_message(msg),
            attempts: msg.send_attempts(),
            is_permanent,
        };
        self.post_with_retry(url, &payload).await;
    }

    async fn post_with_retry<T: Serialize + ?Sized>(&self, url: String, payload: &T) {
        let mut delay = Duration::from_secs(1);
        for attempt in 0..=self.config.retries {
            match self.client.post(&url).json(payload).send().await {
                Ok(response) if response.status().is_success() => return,
                Ok(response) => {
                    warn!(status = %response.status(), attempt, "webhook endpoint returned non-success");
                }
                Err(e) => {
                    warn!(error = %e, attempt, "webhook dispatch failed");
                }
            }
            if attempt < self.config.retries {
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(Duration::from_secs(10));
            }
        }
        error!(url, "webhook dispatch exhausted retries, giving up");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_dispatcher_config_has_no_urls_required() {
        let config = WebhookConfig {
            enabled: false,
            success_url: None,
            failure_url: None,
            timeout_secs: 10,
            retries: 5,
        };
        let dispatcher = WebhookDispatcher::new(config);
        assert!(!dispatcher.config.enabled);
    }
}
