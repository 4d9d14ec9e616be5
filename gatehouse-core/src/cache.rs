//! Process-wide descriptor cache
//!
//! Holds the scanned [`MetadataRegistry`] behind an `ArcSwap`. Readers never
//! block; a stale or invalidated entry is rebuilt by the loader and swapped
//! in atomically.

use crate::config::CacheConfig;
use crate::error::Result;
use crate::registry::MetadataRegistry;
use arc_swap::ArcSwapOption;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

type Loader = dyn Fn() -> Result<MetadataRegistry> + Send + Sync;

struct Snapshot {
    registry: Arc<MetadataRegistry>,
    loaded_at: Instant,
}

/// TTL cache over a registry loader
pub struct DescriptorCache {
    current: ArcSwapOption<Snapshot>,
    loader: Box<Loader>,
    enabled: bool,
    ttl: Duration,
    hits: AtomicU64,
    loads: AtomicU64,
}

impl DescriptorCache {
    /// Create a cache that builds registries with `loader`
    pub fn new<F>(config: &CacheConfig, loader: F) -> Self
    where
        F: Fn() -> Result<MetadataRegistry> + Send + Sync + 'static,
    {
        DescriptorCache {
            current: ArcSwapOption::empty(),
            loader: Box::new(loader),
            enabled: config.enabled,
            ttl: config.ttl(),
            hits: AtomicU64::new(0),
            loads: AtomicU64::new(0),
        }
    }

    /// Cache around an already built registry; reloads return the same one
    pub fn fixed(registry: MetadataRegistry) -> Self {
        let registry = Arc::new(registry);
        let shared = registry.clone();
        let cache = DescriptorCache::new(&CacheConfig::default(), move || Ok((*shared).clone()));
        cache.current.store(Some(Arc::new(Snapshot {
            registry,
            loaded_at: Instant::now(),
        })));
        cache
    }

    /// Current registry, reloading when missing, expired or disabled
    ///
    /// A failed reload keeps serving the previous registry if there is one.
    pub fn get(&self) -> Result<Arc<MetadataRegistry>> {
        if self.enabled {
            if let Some(snapshot) = self.current.load_full() {
                if snapshot.loaded_at.elapsed() < self.ttl {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(snapshot.registry.clone());
                }
                debug!("Descriptor cache expired");
            }
        }

        match self.reload() {
            Ok(registry) => Ok(registry),
            Err(e) => match self.current.load_full() {
                Some(previous) => {
                    warn!("Descriptor reload failed, keeping previous registry: {}", e);
                    Ok(previous.registry.clone())
                }
                None => Err(e),
            },
        }
    }

    /// Rebuild now and swap the result in
    pub fn reload(&self) -> Result<Arc<MetadataRegistry>> {
        let registry = Arc::new((self.loader)()?);
        self.loads.fetch_add(1, Ordering::Relaxed);
        self.current.store(Some(Arc::new(Snapshot {
            registry: registry.clone(),
            loaded_at: Instant::now(),
        })));
        debug!("Descriptor cache loaded {} types", registry.len());
        Ok(registry)
    }

    /// Drop the cached registry; the next `get` reloads
    pub fn invalidate(&self) {
        self.current.store(None);
    }

    /// Number of lookups served from the cache
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Number of times the loader ran
    pub fn loads(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for DescriptorCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorCache")
            .field("enabled", &self.enabled)
            .field("ttl", &self.ttl)
            .field("hits", &self.hits())
            .field("loads", &self.loads())
            .finish()
    }
}
