//! Relay engine: the command surface over catalog, destinations and dispatcher.

use std::sync::Arc;
use std::time::Duration;

use cliprelay_core::config::{CatalogConfig, RelayConfig, SourceKind};
use cliprelay_core::{Config, Platform};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::catalog::{Catalog, CatalogTransport, DiskTransport, S3Transport, spawn_refresh_task};
use crate::dispatcher::Dispatcher;
use crate::error::{CatalogError, RelayError};
use crate::exchange::KeyExchange;
use crate::stream::{Destination, DestinationSet, DestinationStatus};

pub struct RelayEngine {
    catalog: Arc<Catalog>,
    destinations: Arc<DestinationSet>,
    exchange: KeyExchange,
    wake: Arc<Notify>,
    shutdown: CancellationToken,
    refresh_interval: Option<Duration>,
    /// Clip list came from config; no listing at startup.
    seeded: bool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RelayEngine {
    pub fn new(catalog: Catalog, destinations: DestinationSet, relay: &RelayConfig) -> Self {
        Self {
            catalog: Arc::new(catalog),
            destinations: Arc::new(destinations),
            exchange: KeyExchange::new(relay.key_exchange_ttl(), relay.key_exchange_capacity),
            wake: Arc::new(Notify::new()),
            shutdown: CancellationToken::new(),
            refresh_interval: None,
            seeded: false,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Engine over the configured clip source and destinations.
    pub fn from_config(config: &Config) -> cliprelay_core::Result<Self> {
        let transport = catalog_transport(&config.catalog)?;
        let catalog = Catalog::from_config(transport, &config.catalog);
        let destinations = DestinationSet::from_config(config)?;

        let mut engine = Self::new(catalog, destinations, &config.relay);
        engine.refresh_interval = config.catalog.refresh_interval();
        engine.seeded = !config.catalog.files.is_empty();
        Ok(engine)
    }

    #[must_use]
    pub fn with_refresh_interval(mut self, interval: Option<Duration>) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Initial catalog listing. Skipped when the config seeded the clip list.
    pub async fn prime_catalog(&self) -> Result<(), CatalogError> {
        if self.seeded {
            info!(
                clips = self.catalog.cached_list().await.len(),
                "Using configured clip list"
            );
            return Ok(());
        }
        self.catalog.refresh().await.map(|_| ())
    }

    /// Spawn the dispatcher and, if configured, the scheduled refresh.
    pub async fn launch(&self) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return;
        }
        tasks.push(
            Dispatcher::new(
                Arc::clone(&self.catalog),
                Arc::clone(&self.destinations),
                Arc::clone(&self.wake),
                self.shutdown.clone(),
            )
            .spawn(),
        );
        if let Some(interval) = self.refresh_interval {
            info!(interval_secs = interval.as_secs(), "Scheduled catalog refresh enabled");
            tasks.push(spawn_refresh_task(
                Arc::clone(&self.catalog),
                interval,
                Arc::clone(&self.wake),
                self.shutdown.clone(),
            ));
        }
    }

    /// Start every destination and wake the dispatcher.
    pub async fn start_all(&self) -> Result<(), RelayError> {
        let missing = self.destinations.missing_tokens().await;
        if !missing.is_empty() {
            return Err(RelayError::MissingToken(missing));
        }
        self.destinations.start_all().await?;
        self.wake.notify_one();
        Ok(())
    }

    pub async fn stop_all(&self) -> Result<(), RelayError> {
        self.destinations.stop_all().await
    }

    fn destination(&self, platform: &str) -> Result<&Arc<Destination>, RelayError> {
        platform
            .parse::<Platform>()
            .ok()
            .and_then(|p| self.destinations.get(p))
            .ok_or_else(|| RelayError::UnknownPlatform(platform.to_string()))
    }

    /// Replace a destination's stream key. Applies from the next start.
    pub async fn set_token(&self, platform: &str, token: &str) -> Result<Platform, RelayError> {
        let dest = self.destination(platform)?;
        let token = token.trim();
        if token.is_empty() {
            return Err(RelayError::MissingToken(vec![dest.platform()]));
        }
        dest.set_token(token).await;
        Ok(dest.platform())
    }

    /// Queue a known clip and wake the dispatcher. Returns whether it was queued.
    pub async fn enqueue(&self, key: &str) -> bool {
        let queued = self.catalog.enqueue(key).await;
        if queued {
            self.wake.notify_one();
        }
        queued
    }

    pub async fn current_queue(&self) -> Vec<String> {
        self.catalog.queue().await
    }

    pub async fn cached_keys(&self) -> Vec<String> {
        self.catalog.cached_list().await
    }

    /// Re-list the catalog. A non-empty listing wakes an idle dispatcher.
    pub async fn refresh_catalog(&self) -> Result<usize, CatalogError> {
        let count = self.catalog.refresh().await?;
        if count > 0 {
            self.wake.notify_one();
        }
        Ok(count)
    }

    pub async fn status(&self) -> Vec<DestinationStatus> {
        self.destinations.status().await
    }

    /// Park a stream key and return the ticket that applies it.
    pub async fn offer_token(&self, token: &str) -> Result<String, RelayError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(RelayError::MissingToken(self.destinations.platforms().collect()));
        }
        Ok(self.exchange.offer(token).await)
    }

    /// Offered keys not yet redeemed or expired.
    pub async fn pending_tickets(&self) -> usize {
        self.exchange.outstanding().await
    }

    /// Apply the key behind `ticket` to `platform`. Each ticket works once.
    pub async fn redeem_token(&self, platform: &str, ticket: &str) -> Result<Platform, RelayError> {
        let dest = self.destination(platform)?;
        let token = self
            .exchange
            .redeem(ticket)
            .await
            .ok_or_else(|| RelayError::UnknownTicket(ticket.to_string()))?;
        dest.set_token(token).await;
        Ok(dest.platform())
    }

    /// Stop every destination and wait for background tasks to finish.
    pub async fn shutdown(&self) {
        info!("Shutting down relay engine");
        self.shutdown.cancel();
        if let Err(e) = self.destinations.stop_all().await {
            warn!(error = %e, "Failed to stop destinations on shutdown");
        }
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task failed");
            }
        }
    }
}

fn catalog_transport(
    config: &CatalogConfig,
) -> cliprelay_core::Result<Arc<dyn CatalogTransport>> {
    match (config.source, &config.s3) {
        (SourceKind::Disk, _) => {
            info!(root = %config.root.display(), "Using disk catalog source");
            Ok(Arc::new(DiskTransport::new(&config.root)))
        }
        (SourceKind::S3, Some(s3)) => S3Transport::new(s3)
            .map(|t| Arc::new(t) as Arc<dyn CatalogTransport>)
            .map_err(|e| cliprelay_core::Error::Config(format!("Invalid S3 catalog source: {e}"))),
        (SourceKind::S3, None) => Err(cliprelay_core::Error::Config(
            "catalog source is s3 but [catalog.s3] is missing".to_string(),
        )),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::Path;

    use cliprelay_core::config::parse_config;

    use super::*;

    fn engine(root: &Path) -> RelayEngine {
        let doc = format!(
            "ffmpeg_path = \"/nonexistent/cliprelay/ffmpeg\"\n\n[catalog]\nroot = \"{}\"\n\n[[destinations]]\nplatform = \"twitch\"\n",
            root.display()
        );
        RelayEngine::from_config(&parse_config(&doc).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn start_all_without_token_names_platform() {
        let dir = tempfile::TempDir::new().unwrap();
        let engine = engine(dir.path());
        let err = engine.start_all().await.unwrap_err();
        assert_eq!(err.to_string(), "Stream key not set for: twitch");
    }

    #[tokio::test]
    async fn start_all_spawn_failure_is_reported() {
        let dir = tempfile::TempDir::new().unwrap();
        let engine = engine(dir.path());
        engine.set_token("twitch", "live_1").await.unwrap();
        let err = engine.start_all().await.unwrap_err();
        assert!(matches!(err, RelayError::SpawnFailed { .. }));
        assert!(!engine.status().await[0].running);
    }

    #[tokio::test]
    async fn set_token_rejects_unknown_platform() {
        let dir = tempfile::TempDir::new().unwrap();
        let engine = engine(dir.path());
        assert!(matches!(
            engine.set_token("youtube", "k").await,
            Err(RelayError::UnknownPlatform(_))
        ));
        assert_eq!(engine.set_token("TWITCH", " k ").await.unwrap(), Platform::Twitch);
        assert!(engine.status().await[0].has_token);
    }

    #[tokio::test]
    async fn prime_lists_catalog_and_enqueue_checks_membership() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.ts"), b"a").unwrap();
        std::fs::write(dir.path().join("readme.md"), b"r").unwrap();
        let engine = engine(dir.path());

        engine.prime_catalog().await.unwrap();
        assert_eq!(engine.cached_keys().await, vec!["a.ts".to_string()]);
        assert!(!engine.enqueue("readme.md").await);
        assert!(engine.enqueue("a.ts").await);
        assert_eq!(engine.current_queue().await, vec!["a.ts".to_string()]);
    }

    #[tokio::test]
    async fn prime_fails_on_missing_root() {
        let dir = tempfile::TempDir::new().unwrap();
        let engine = engine(&dir.path().join("absent"));
        assert!(matches!(
            engine.prime_catalog().await,
            Err(CatalogError::Listing { .. })
        ));
    }

    #[tokio::test]
    async fn offered_token_redeems_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let engine = engine(dir.path());
        let ticket = engine.offer_token("live_xyz").await.unwrap();
        assert_eq!(engine.pending_tickets().await, 1);

        assert_eq!(
            engine.redeem_token("twitch", &ticket).await.unwrap(),
            Platform::Twitch
        );
        assert!(engine.status().await[0].has_token);
        assert_eq!(engine.pending_tickets().await, 0);
        assert!(matches!(
            engine.redeem_token("twitch", &ticket).await,
            Err(RelayError::UnknownTicket(_))
        ));
    }

    #[tokio::test]
    async fn s3_source_builds_without_listing() {
        let doc = r#"
[catalog]
source = "s3"
prefix = "videos/"

[catalog.s3]
bucket = "clips"
endpoint = "http://127.0.0.1:9000"

[[destinations]]
platform = "twitch"
"#;
        let config = parse_config(doc).unwrap();
        config.validate().unwrap();
        let engine = RelayEngine::from_config(&config).unwrap();
        assert!(engine.cached_keys().await.is_empty());
    }

    #[tokio::test]
    async fn shutdown_joins_background_tasks() {
        let dir = tempfile::TempDir::new().unwrap();
        let engine = engine(dir.path()).with_refresh_interval(Some(Duration::from_secs(60)));
        engine.launch().await;
        assert_eq!(engine.tasks.lock().await.len(), 2);
        engine.shutdown().await;
        assert!(engine.tasks.lock().await.is_empty());
    }
}
