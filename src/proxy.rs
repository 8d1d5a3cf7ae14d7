//! Request orchestration shared by the fit and resize routes.
//!
//! ```text
//! token ──decode──▶ url ──┐
//! size ──parse───▶ geometry ──▶ CacheKey
//!                                  │
//!          ┌──── store has key ────┴──── miss ────┐
//!          ▼                                      ▼
//!   validators ─▶ 304 | 200         single-flight leader: fetch ─▶ transform
//!                                                 ─▶ write ─▶ 200 + validators
//! ```

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info};
use url::Url;

use crate::cache::{CacheKey, CacheStore, DiskCache, Flight, SingleFlight};
use crate::config::ProxyConfig;
use crate::fetch::{HttpFetcher, SourceFetcher};
use crate::freshness::{self, Freshness, Validators};
use crate::metrics::Metrics;
use crate::transform::{self, Geometry, ImageEngine, Operation, WebpEngine};
use crate::{url_codec, ProxyError};

/// Conditional request headers, borrowed from the request.
#[derive(Debug, Clone, Copy, Default)]
pub struct Conditions<'a> {
    pub if_none_match: Option<&'a str>,
    pub if_modified_since: Option<&'a str>,
}

/// What the handler should send back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    NotModified,
    /// `validators` is `None` when caching is disabled.
    Image {
        bytes: Bytes,
        validators: Option<Validators>,
    },
}

/// Fetch, transform and cache pipeline.
///
/// Without a store every request fetches and transforms on its own. With a
/// store, concurrent misses for one key share a single fetch+transform.
pub struct ImageProxy {
    store: Option<Arc<dyn CacheStore>>,
    flights: SingleFlight,
    fetcher: Arc<dyn SourceFetcher>,
    engine: Arc<dyn ImageEngine>,
    allow_private_hosts: bool,
    metrics: Metrics,
}

impl ImageProxy {
    /// A proxy with caching disabled.
    pub fn new(fetcher: Arc<dyn SourceFetcher>, engine: Arc<dyn ImageEngine>) -> Self {
        Self {
            store: None,
            flights: SingleFlight::new(),
            fetcher,
            engine,
            allow_private_hosts: false,
            metrics: Metrics::new(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_private_hosts(mut self, allow: bool) -> Self {
        self.allow_private_hosts = allow;
        self
    }

    /// Wires the HTTP fetcher, WebP engine and (when enabled) the disk cache.
    pub async fn from_config(cfg: &ProxyConfig) -> Result<Self, ProxyError> {
        let fetcher = HttpFetcher::new(cfg.fetch_timeout, cfg.max_input_size, cfg.allow_private_hosts)?;
        let engine = WebpEngine::new(cfg.quality);
        let proxy = Self::new(Arc::new(fetcher), Arc::new(engine))
            .with_private_hosts(cfg.allow_private_hosts);

        if !cfg.use_cache {
            return Ok(proxy);
        }
        let disk = DiskCache::open(&cfg.cache_dir).await?;
        Ok(proxy.with_store(Arc::new(disk)))
    }

    pub fn store(&self) -> Option<&Arc<dyn CacheStore>> {
        self.store.as_ref()
    }

    pub fn caching_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Runs one request through decode, validation, cache and transform.
    ///
    /// Token and geometry are validated before any network or disk access.
    pub async fn deliver(
        &self,
        token: &str,
        op: Operation,
        size: Option<&str>,
        conditions: Conditions<'_>,
    ) -> Result<Delivery, ProxyError> {
        let source = url_codec::decode(token)?;
        let geometry = Geometry::parse(op, size)?;
        let url = url_codec::validate_source_url(&source, self.allow_private_hosts)?;
        let key = CacheKey::new(&geometry, &source);
        debug!("Processing {} request: key={}, url={}", op, key, url);

        let Some(store) = self.store.as_ref() else {
            let bytes = self.produce(&url, geometry).await?;
            return Ok(Delivery::Image { bytes, validators: None });
        };

        loop {
            if let Some(entry) = store.load(&key).await? {
                info!("Cache hit for key={}", key);
                Metrics::incr(&self.metrics.cache_hits);
                let (freshness, validators) = freshness::evaluate(
                    &entry.bytes,
                    entry.modified,
                    conditions.if_none_match,
                    conditions.if_modified_since,
                );
                return Ok(match freshness {
                    Freshness::Fresh => Delivery::NotModified,
                    Freshness::Stale => Delivery::Image {
                        bytes: entry.bytes,
                        validators: Some(validators),
                    },
                });
            }

            let _guard = match self.flights.join(key.as_str()) {
                Flight::Leader(guard) => guard,
                Flight::Follower(wait) => {
                    debug!("Waiting on in-flight transform for key={}", key);
                    Metrics::incr(&self.metrics.coalesced);
                    wait.wait().await;
                    continue;
                }
            };

            // a previous leader may have committed between lookup and claim
            if store.exists(&key).await? {
                continue;
            }

            info!("Cache miss for key={}, fetching from {}", key, url);
            Metrics::incr(&self.metrics.cache_misses);
            let bytes = self.produce(&url, geometry).await?;
            store.write_atomic(&key, &bytes).await?;
            let modified = store.modified(&key).await?;

            return Ok(Delivery::Image {
                validators: Some(Validators::compute(&bytes, modified)),
                bytes,
            });
        }
    }

    async fn produce(&self, url: &Url, geometry: Geometry) -> Result<Bytes, ProxyError> {
        let source = self.fetcher.fetch(url).await.map_err(|e| {
            Metrics::incr(&self.metrics.fetch_errors);
            e
        })?;
        let out = transform::dispatch(self.engine.clone(), source, geometry).await?;
        Metrics::incr(&self.metrics.transforms);
        Ok(Bytes::from(out))
    }
}
