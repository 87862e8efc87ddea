//! Clip selection: explicit queue first, then the configured pick strategy.
//!
//! The cached clip list and the queue share one lock. Operator commands,
//! scheduled refreshes and the dispatcher all go through it.

use std::collections::VecDeque;
use std::sync::Arc;

use cliprelay_core::config::{CatalogConfig, PickStrategy};
use rand::RngExt;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::transport::{CatalogTransport, ClipReader};
use crate::error::CatalogError;

/// A selected clip. `length` is 0 until fetched, or when the transport cannot report it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipReference {
    pub key: String,
    pub length: u64,
}

impl ClipReference {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            length: 0,
        }
    }
}

/// A fetched clip, ready to be fed.
pub struct Clip {
    pub reference: ClipReference,
    pub content: ClipReader,
}

impl std::fmt::Debug for Clip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clip")
            .field("reference", &self.reference)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct CatalogState {
    /// Known clip keys, replaced wholesale by refreshes.
    clips: Vec<String>,
    /// Operator-requested clips, served before any strategy pick.
    queue: VecDeque<String>,
}

/// Cached clip list plus explicit queue over a [`CatalogTransport`].
pub struct Catalog {
    transport: Arc<dyn CatalogTransport>,
    prefix: String,
    extension: String,
    strategy: PickStrategy,
    state: RwLock<CatalogState>,
}

impl Catalog {
    pub fn new(
        transport: Arc<dyn CatalogTransport>,
        prefix: impl Into<String>,
        extension: impl Into<String>,
        strategy: PickStrategy,
    ) -> Self {
        Self {
            transport,
            prefix: prefix.into(),
            extension: extension.into(),
            strategy,
            state: RwLock::new(CatalogState::default()),
        }
    }

    /// Build a catalog from config. An explicit `files` list seeds the cache.
    pub fn from_config(transport: Arc<dyn CatalogTransport>, config: &CatalogConfig) -> Self {
        let mut catalog = Self::new(
            transport,
            config.prefix.trim_end_matches('/'),
            config.extension.clone(),
            config.pick_strategy,
        );
        catalog.state.get_mut().clips.clone_from(&config.files);
        catalog
    }

    /// Pop the queue head, or apply the pick strategy to the cached list.
    pub async fn get_next(&self) -> Result<ClipReference, CatalogError> {
        let mut state = self.state.write().await;
        if let Some(key) = state.queue.pop_front() {
            debug!(key = %key, remaining = state.queue.len(), "Serving queued clip");
            return Ok(ClipReference::new(key));
        }

        let key = match self.strategy {
            PickStrategy::Random => pick_random(&state.clips),
            PickStrategy::Unrecognized => None,
        };
        drop(state);

        key.map(ClipReference::new).ok_or(CatalogError::NoContent)
    }

    /// Open the clip's byte stream and fill in its length.
    pub async fn fetch(&self, reference: &ClipReference) -> Result<Clip, CatalogError> {
        let (content, length) = self.transport.fetch_content(&reference.key).await?;
        Ok(Clip {
            reference: ClipReference {
                key: reference.key.clone(),
                length,
            },
            content,
        })
    }

    /// Queue `key` if it is a known clip. Returns whether it was queued.
    pub async fn enqueue(&self, key: &str) -> bool {
        let mut state = self.state.write().await;
        if !state.clips.iter().any(|k| k == key) {
            debug!(key, "Ignoring enqueue of unknown clip");
            return false;
        }
        state.queue.push_back(key.to_string());
        info!(key, queued = state.queue.len(), "Clip queued");
        true
    }

    /// Re-list the source and replace the cached list. The queue is left alone.
    pub async fn refresh(&self) -> Result<usize, CatalogError> {
        let mut keys = self.transport.list_keys(&self.prefix).await?;
        keys.retain(|k| k.ends_with(&self.extension));

        let count = keys.len();
        self.state.write().await.clips = keys;
        info!(prefix = %self.prefix, clips = count, "Clip list updated");
        Ok(count)
    }

    /// Pending queue, head first.
    pub async fn queue(&self) -> Vec<String> {
        self.state.read().await.queue.iter().cloned().collect()
    }

    pub async fn cached_list(&self) -> Vec<String> {
        self.state.read().await.clips.clone()
    }
}

fn pick_random(clips: &[String]) -> Option<String> {
    match clips {
        [] => None,
        [only] => Some(only.clone()),
        _ => {
            let idx = rand::rng().random_range(0..clips.len());
            clips.get(idx).cloned()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use cliprelay_core::config::SourceKind;

    use super::*;

    /// Listing comes from a mutable vector; content is the key's bytes.
    #[derive(Default)]
    struct ListTransport {
        keys: Mutex<Vec<String>>,
    }

    impl ListTransport {
        fn with(keys: &[&str]) -> Arc<Self> {
            let t = Self::default();
            t.set(keys);
            Arc::new(t)
        }

        fn set(&self, keys: &[&str]) {
            *self.keys.lock().unwrap() = keys.iter().map(ToString::to_string).collect();
        }
    }

    #[async_trait]
    impl CatalogTransport for ListTransport {
        async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, CatalogError> {
            let keys = self.keys.lock().unwrap();
            Ok(keys.iter().filter(|k| k.starts_with(prefix)).cloned().collect())
        }

        async fn fetch_content(&self, key: &str) -> Result<(ClipReader, u64), CatalogError> {
            let bytes = key.as_bytes().to_vec();
            let len = bytes.len() as u64;
            Ok((Box::new(std::io::Cursor::new(bytes)), len))
        }
    }

    async fn catalog(keys: &[&str]) -> (Arc<ListTransport>, Catalog) {
        let transport = ListTransport::with(keys);
        let catalog = Catalog::new(transport.clone(), "", ".ts", PickStrategy::Random);
        catalog.refresh().await.unwrap();
        (transport, catalog)
    }

    #[tokio::test]
    async fn queue_takes_precedence_in_fifo_order() {
        let (_, catalog) = catalog(&["a.ts", "b.ts", "c.ts"]).await;
        assert!(catalog.enqueue("a.ts").await);
        assert!(catalog.enqueue("b.ts").await);

        assert_eq!(catalog.get_next().await.unwrap().key, "a.ts");
        assert_eq!(catalog.get_next().await.unwrap().key, "b.ts");
        for _ in 0..20 {
            let key = catalog.get_next().await.unwrap().key;
            assert!(["a.ts", "b.ts", "c.ts"].contains(&key.as_str()));
        }
    }

    #[tokio::test]
    async fn enqueue_unknown_key_is_noop() {
        let (_, catalog) = catalog(&["a.ts"]).await;
        assert!(!catalog.enqueue("z.ts").await);
        assert!(catalog.queue().await.is_empty());
    }

    #[tokio::test]
    async fn single_clip_is_deterministic() {
        let (_, catalog) = catalog(&["only.ts"]).await;
        for _ in 0..5 {
            assert_eq!(catalog.get_next().await.unwrap().key, "only.ts");
        }
    }

    #[tokio::test]
    async fn empty_catalog_has_no_content() {
        let (_, catalog) = catalog(&[]).await;
        assert!(matches!(catalog.get_next().await, Err(CatalogError::NoContent)));
    }

    #[tokio::test]
    async fn unrecognized_strategy_serves_only_queue() {
        let transport = ListTransport::with(&["a.ts", "b.ts"]);
        let catalog = Catalog::new(transport, "", ".ts", PickStrategy::Unrecognized);
        catalog.refresh().await.unwrap();

        assert!(catalog.enqueue("b.ts").await);
        assert_eq!(catalog.get_next().await.unwrap().key, "b.ts");
        assert!(matches!(catalog.get_next().await, Err(CatalogError::NoContent)));
    }

    #[tokio::test]
    async fn refresh_filters_extension_and_keeps_queue() {
        let (transport, catalog) = catalog(&["a.ts", "b.ts", "readme.md"]).await;
        assert_eq!(catalog.cached_list().await, vec!["a.ts", "b.ts"]);
        assert!(catalog.enqueue("a.ts").await);

        transport.set(&["c.ts"]);
        assert_eq!(catalog.refresh().await.unwrap(), 1);
        assert_eq!(catalog.cached_list().await, vec!["c.ts"]);
        // Stale keys stay queued; they fail lazily at fetch time.
        assert_eq!(catalog.queue().await, vec!["a.ts"]);
        assert_eq!(catalog.get_next().await.unwrap().key, "a.ts");
    }

    #[tokio::test]
    async fn fetch_fills_length() {
        let (_, catalog) = catalog(&["clip.ts"]).await;
        let reference = catalog.get_next().await.unwrap();
        assert_eq!(reference.length, 0);
        let clip = catalog.fetch(&reference).await.unwrap();
        assert_eq!(clip.reference.key, "clip.ts");
        assert_eq!(clip.reference.length, 7);
    }

    #[tokio::test]
    async fn files_seed_the_cache() {
        let config = CatalogConfig {
            source: SourceKind::Disk,
            root: "/unused".into(),
            s3: None,
            prefix: String::new(),
            extension: ".ts".into(),
            pick_strategy: PickStrategy::Random,
            files: vec!["x.ts".into(), "y.ts".into()],
            refresh_interval_secs: 0,
        };
        let catalog = Catalog::from_config(ListTransport::with(&[]), &config);
        assert_eq!(catalog.cached_list().await, vec!["x.ts", "y.ts"]);
        assert!(catalog.enqueue("y.ts").await);
    }
}
