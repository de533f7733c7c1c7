//! Send-queue worker: pulls `Pending` messages out of the mailstore,
//! resolves the recipient's MX, signs with DKIM, and hands off to
//! [`SmtpClient`]. Prefers a push wake-up over the mailstore's change
//! broadcast, with a polling fallback so a missed notification never
//! stalls the queue indefinitely.
//!
//! Retry schedule is fixed: 5m, 15m, 30m, 1h, then 1h for every attempt
//! after that, up to `AuthConfig::max_retries`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use crate::config::{AuthConfig, DkimConfig};
use crate::dkim::{DkimSigner, KeyMaterial, StaticKeySource};
use crate::error::Result;
use crate::ip_selection::{IpSelectionContext, IpSelector};
use crate::mailstore::{ChangeKind, Mailstore, Message, QueueStatus, SendAttempt};
use crate::smtp::client::SmtpClient;
use crate::utils::dns::lookup_mx;
use crate::utils::email::domain_of;
use crate::webhook::WebhookDispatcher;

const POLL_INTERVAL: Duration = Duration::from_secs(10);
const PENDING_BATCH: i64 = 50;

/// Fixed retry backoff: 5m, 15m, 30m, 1h, then 1h forever after.
fn retry_delay(retry_count: i64) -> ChronoDuration {
    match retry_count {
        0 => ChronoDuration::minutes(5),
        1 => ChronoDuration::minutes(15),
        2 => ChronoDuration::minutes(30),
        _ => ChronoDuration::hours(1),
    }
}

fn is_due(msg: &Message) -> bool {
    match msg.last_attempt {
        None => true,
        Some(last) => Utc::now() >= last + retry_delay(msg.retry_count),
    }
}

pub struct SendQueueWorker {
    store: Arc<Mailstore>,
    hostname: String,
    max_retries: u32,
    dkim_signer: Arc<DkimSigner<StaticKeySource>>,
    dkim_enabled: bool,
    ip_selector: Arc<dyn IpSelector>,
    webhook: Arc<WebhookDispatcher>,
    semaphore: Arc<Semaphore>,
}

impl SendQueueWorker {
    pub fn new(
        store: Arc<Mailstore>,
        hostname: String,
        auth_config: AuthConfig,
        dkim_config: DkimConfig,
        dkim_key: Option<KeyMaterial>,
        ip_selector: Arc<dyn IpSelector>,
        webhook: Arc<WebhookDispatcher>,
    ) -> Self {
        let dkim_enabled = dkim_config.enabled;
        let source = StaticKeySource::new(dkim_key);
        let signer = DkimSigner::new(source, dkim_config.headers_to_sign);
        SendQueueWorker {
            store,
            hostname,
            max_retries: auth_config.max_retries,
            semaphore: Arc::new(Semaphore::new(auth_config.worker_concurrency)),
            dkim_signer: Arc::new(signer),
            dkim_enabled,
            ip_selector,
            webhook,
        }
    }

    /// Runs forever, driven by the mailstore's `QueueReady` broadcast
    /// with a polling fallback so the queue still drains if a
    /// notification is dropped.
    pub async fn run(self: Arc<Self>) {
        let mut changes = self.store.subscribe();
        loop {
            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                event = changes.recv() => {
                    match event {
                        Ok(event) if matches!(event.kind, ChangeKind::QueueReady) => {}
                        Ok(_) => continue,
                        Err(_) => {}
                    }
                }
            }
            if let Err(e) = self.drain_once().await {
                error!(error = %e, "send-queue drain pass failed");
            }
        }
    }

    async fn drain_once(&self) -> Result<()> {
        let pending = self.store.get_pending(Utc::now(), PENDING_BATCH).await?;
        let due: Vec<Message> = pending.into_iter().filter(is_due).collect();
        if due.is_empty() {
            return Ok(());
        }
        debug!(count = due.len(), "draining send queue");

        let mut handles = Vec::with_capacity(due.len());
        for msg in due {
            let permit = self.semaphore.clone().acquire_owned().await;
            let worker = self.snapshot();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                worker.attempt_delivery(msg).await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }

    fn snapshot(&self) -> WorkerHandle {
        WorkerHandle {
            store: self.store.clone(),
            hostname: self.hostname.clone(),
            max_retries: self.max_retries,
            dkim_signer: self.dkim_signer.clone(),
            dkim_enabled: self.dkim_enabled,
            ip_selector: self.ip_selector.clone(),
            webhook: self.webhook.clone(),
        }
    }
}

/// Owned snapshot of what a single delivery attempt needs, so each
/// spawned task doesn't hold a borrow of the worker.
struct WorkerHandle {
    store: Arc<Mailstore>,
    hostname: String,
    max_retries: u32,
    dkim_signer: Arc<DkimSigner<StaticKeySource>>,
    dkim_enabled: bool,
    ip_selector: Arc<dyn IpSelector>,
    webhook: Arc<WebhookDispatcher>,
}

impl WorkerHandle {
    async fn attempt_delivery(&self, msg: Message) {
        let recipients = msg.to_addrs();
        if recipients.is_empty() {
            warn!(id = %msg.id, "pending message has no recipient, marking permanently failed");
            let attempt = SendAttempt {
                timestamp: Utc::now(),
                success: false,
                response: None,
                error: Some("no recipient".to_string()),
            };
            let _ = self
                .store
                .mark_attempts(&msg.id, QueueStatus::FailedPermanent, msg.retry_count, &[attempt], Some("no recipient"))
                .await;
            return;
        }
        let from = msg.from_addr.clone().unwrap_or_default();

        let mut attempts = Vec::new();
        let mut failures: Vec<(String, crate::error::MailError)> = Vec::new();
        for to in &recipients {
            match self.try_send(&msg, &from, to, &mut attempts).await {
                Ok(response) => debug!(id = %msg.id, %to, response, "delivered to recipient"),
                Err(e) => failures.push((to.clone(), e)),
            }
        }

        if failures.is_empty() {
            let response = attempts.last().and_then(|a| a.response.clone());
            if let Err(e) = self
                .store
                .mark_attempts(&msg.id, QueueStatus::Sent, msg.retry_count, &attempts, None)
                .await
            {
                error!(id = %msg.id, error = %e, "failed to record successful delivery");
                return;
            }
            debug!(id = %msg.id, response = ?response, "message delivered");
            self.webhook.dispatch_success(&msg).await;
        } else {
            let retry_count = msg.retry_count + 1;
            let is_permanent = retry_count as u32 > self.max_retries
                || failures.iter().all(|(_, e)| !e.is_transient_remote());
            // Retryable failures stay `Pending` so `get_pending` keeps
            // surfacing them; `is_due` holds them back until their
            // backoff window elapses. `Failed` is reserved for a
            // message an operator has paused by hand.
            let status = if is_permanent {
                QueueStatus::FailedPermanent
            } else {
                QueueStatus::Pending
            };
            let error_text = failures
                .iter()
                .map(|(to, e)| format!("{to}: {e}"))
                .collect::<Vec<_>>()
                .join("; ");
            if let Err(store_err) = self
                .store
                .mark_attempts(&msg.id, status, retry_count, &attempts, Some(&error_text))
                .await
            {
                error!(id = %msg.id, error = %store_err, "failed to record failed delivery attempt");
                return;
            }
            warn!(id = %msg.id, error = %error_text, retry_count, is_permanent, "delivery attempt failed");
            self.webhook.dispatch_failure(&msg, is_permanent).await;
        }
    }

    /// Tries every MX host for `to`'s domain in preference order, stopping
    /// at the first success or the first permanent (non-4xx) rejection.
    /// Every host tried, successful or not, appends a [`SendAttempt`].
    async fn try_send(
        &self,
        msg: &Message,
        from: &str,
        to: &str,
        attempts: &mut Vec<SendAttempt>,
    ) -> Result<String> {
        let domain = domain_of(to).to_string();
        let mx_hosts = lookup_mx(&domain).await?;
        if mx_hosts.is_empty() {
            return Err(crate::error::MailError::DnsLookup(format!("no MX records for {domain}")));
        }

        let raw = if self.dkim_enabled {
            self.dkim_signer.sign(&msg.raw, &domain_of(from)).await
        } else {
            msg.raw.clone()
        };

        let ctx = IpSelectionContext {
            sender: from,
            recipients: &[to.to_string()],
            subject: msg.subject.as_deref(),
            timestamp: Utc::now(),
        };
        let local_bind = self.ip_selector.select(&ctx).await;

        let mut last_err = None;
        for host in mx_hosts {
            let client = SmtpClient::new(host)
                .with_local_bind(local_bind)
                .with_ehlo_domain(self.hostname.clone());
            match client.send_mail(from, to, &raw).await {
                Ok(response) => {
                    attempts.push(SendAttempt {
                        timestamp: Utc::now(),
                        success: true,
                        response: Some(response.clone()),
                        error: None,
                    });
                    return Ok(response);
                }
                Err(e) => {
                    attempts.push(SendAttempt {
                        timestamp: Utc::now(),
                        success: false,
                        response: None,
                        error: Some(e.to_string()),
                    });
                    let is_permanent = !e.is_transient_remote();
                    last_err = Some(e);
                    if is_permanent {
                        break;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| crate::error::MailError::DnsLookup(format!("no MX records for {domain}"))))
    }
}
