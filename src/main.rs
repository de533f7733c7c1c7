use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use mail_rs::antispam::GreylistManager;
use mail_rs::config::{Config, TlsMode};
use mail_rs::dkim::KeyMaterial;
use mail_rs::ip_selection::client::HttpIpSelector;
use mail_rs::ip_selection::{IpSelector, NoopSelector};
use mail_rs::mailstore::Mailstore;
use mail_rs::security::rate_limit::RateLimiter;
use mail_rs::security::{Authenticator, TlsServerConfig};
use mail_rs::imap::ImapServer;
use mail_rs::smtp::{SendQueueWorker, SmtpServer};
use mail_rs::spam::{HttpSpamScanner, SpamScannerClient};
use mail_rs::transport::TlsSupport;
use mail_rs::webhook::WebhookDispatcher;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mail_rs=info,warn"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .pretty()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("failed to set tracing subscriber");

    info!("starting mail-rs server");

    let config = if std::path::Path::new("config.toml").exists() {
        Config::from_file("config.toml")?
    } else {
        info!("no config file found, using defaults");
        Config::default()
    };
    info!(domain = %config.server.domain, db = %config.database.url, "configuration loaded");

    let store = Mailstore::connect(&config.database.url).await?;
    let authenticator = Arc::new(Authenticator::new(store.clone()));
    let rate_limiter = Arc::new(RateLimiter::new());

    let tls = match (config.tls.mode, &config.tls.cert_path, &config.tls.key_path) {
        (TlsMode::Enabled, Some(cert), Some(key)) => {
            let server_config = TlsServerConfig::from_pem_files(cert, key)?;
            Some(TlsSupport::new(server_config))
        }
        (TlsMode::Enabled, _, _) => {
            warn!("tls.mode is enabled but cert_path/key_path are missing, running without TLS");
            None
        }
        (TlsMode::Disabled, _, _) => None,
    };

    let spam_scanner: Option<Arc<dyn SpamScannerClient>> = if config.spam.enabled {
        Some(Arc::new(HttpSpamScanner::new(&config.spam)))
    } else {
        None
    };

    // Greylisting is a policy action the spam scanner's verdict can
    // trigger; it's cheap idle, so it's always wired in regardless of
    // whether scanning itself is enabled.
    let greylist = Some(Arc::new(GreylistManager::new()));

    let ip_selector: Arc<dyn IpSelector> = if config.ip_selection.enabled {
        Arc::new(HttpIpSelector::new(config.ip_selection.clone()))
    } else {
        Arc::new(NoopSelector)
    };

    let webhook = Arc::new(WebhookDispatcher::new(config.webhook.clone()));

    let dkim_key = if config.dkim.enabled {
        match &config.dkim.plugin_path {
            Some(path) => match std::fs::read_to_string(path) {
                Ok(pem) => Some(KeyMaterial {
                    private_key_pem: pem,
                    selector: config.dkim.selector.clone(),
                    domain: config.server.domain.clone(),
                }),
                Err(e) => {
                    warn!(error = %e, path, "could not read DKIM private key, sending unsigned");
                    None
                }
            },
            None => {
                warn!("dkim.enabled is true but no plugin_path configured, sending unsigned");
                None
            }
        }
    } else {
        None
    };

    let worker = Arc::new(SendQueueWorker::new(
        store.clone(),
        config.server.hostname.clone(),
        config.auth.clone(),
        config.dkim.clone(),
        dkim_key,
        ip_selector,
        webhook,
    ));
    tokio::spawn(worker.run());

    let imap_server = Arc::new(ImapServer::new(
        config.clone(),
        store.clone(),
        authenticator.clone(),
        tls.clone(),
        Some(rate_limiter.clone()),
    ));

    let smtp_server = Arc::new(SmtpServer::new(
        config,
        store,
        authenticator,
        tls,
        spam_scanner,
        greylist,
        Some(rate_limiter),
    ));

    tokio::try_join!(smtp_server.run(), imap_server.run())?;

    Ok(())
}
