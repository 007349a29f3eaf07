//! Auto-purging in-memory image cache
//!
//! Keyed storage for decoded images with byte accounting and
//! least-recently-used eviction. Inserting past `memory_capacity` evicts
//! entries in ascending last-access order until usage drops to
//! `preferred_memory_usage_after_purge`; the gap between the two values
//! bounds eviction hysteresis so a burst of inserts triggers one purge
//! rather than one per entry.
//!
//! Lookups run under a shared read lock and refresh the entry's access
//! stamp through an atomic, so concurrent readers never serialize on the
//! map. Writers (add/remove/clear) are exclusive, and the insert+evict
//! phases of an add are observed atomically by any other writer.

use crate::image::Image;
use crate::request::ImageRequest;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Instant;
use tracing::debug;

/// Builds the cache key for a request fingerprint and optional filter.
///
/// `"<url>"` without a filter, `"<url>-<filter-identifier>"` with one.
pub fn cache_key(url_id: &str, filter_identifier: Option<&str>) -> String {
  match filter_identifier {
    Some(identifier) => format!("{}-{}", url_id, identifier),
    None => url_id.to_string(),
  }
}

/// Configuration for [`AutoPurgingImageCache`].
#[derive(Debug, Clone, Copy)]
pub struct ImageCacheConfig {
  /// Hard ceiling in bytes; crossing it triggers a purge.
  pub memory_capacity: u64,
  /// Floor in bytes that a purge drains down to.
  pub preferred_memory_usage_after_purge: u64,
}

impl Default for ImageCacheConfig {
  fn default() -> Self {
    Self {
      memory_capacity: 100_000_000,
      preferred_memory_usage_after_purge: 60_000_000,
    }
  }
}

impl ImageCacheConfig {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_memory_capacity(mut self, memory_capacity: u64) -> Self {
    self.memory_capacity = memory_capacity;
    self
  }

  pub fn with_preferred_memory_usage_after_purge(mut self, preferred: u64) -> Self {
    self.preferred_memory_usage_after_purge = preferred;
    self
  }
}

struct CachedImage {
  image: Image,
  total_bytes: u64,
  /// Nanoseconds since the cache epoch; refreshed on every hit.
  last_accessed: AtomicU64,
}

struct CacheInner {
  entries: HashMap<String, CachedImage>,
  usage: u64,
}

/// Keyed image store with LRU-by-last-access eviction under a byte budget.
///
/// # Examples
///
/// ```rust,ignore
/// use imageloader::cache::{AutoPurgingImageCache, ImageCacheConfig};
///
/// let cache = AutoPurgingImageCache::new(
///     ImageCacheConfig::new()
///         .with_memory_capacity(50_000_000)
///         .with_preferred_memory_usage_after_purge(30_000_000),
/// );
/// cache.add(image, "https://example.com/logo.png");
/// ```
pub struct AutoPurgingImageCache {
  config: ImageCacheConfig,
  epoch: Instant,
  inner: RwLock<CacheInner>,
}

impl AutoPurgingImageCache {
  /// Creates a cache with the given budget.
  ///
  /// # Panics
  ///
  /// Panics unless `memory_capacity >= preferred_memory_usage_after_purge`.
  pub fn new(config: ImageCacheConfig) -> Self {
    assert!(
      config.memory_capacity >= config.preferred_memory_usage_after_purge,
      "memory capacity ({}) must be at least the preferred usage after purge ({})",
      config.memory_capacity,
      config.preferred_memory_usage_after_purge,
    );
    Self {
      config,
      epoch: Instant::now(),
      inner: RwLock::new(CacheInner {
        entries: HashMap::new(),
        usage: 0,
      }),
    }
  }

  fn stamp(&self) -> u64 {
    self.epoch.elapsed().as_nanos() as u64
  }

  /// Stores or replaces the image under `key`.
  ///
  /// Replacement subtracts the previous entry's bytes before adding the
  /// new ones. If usage then exceeds the capacity, least-recently
  /// accessed entries are evicted until usage is at or below the purge
  /// floor. Lookups never trigger eviction; only adds do.
  pub fn add(&self, image: Image, key: &str) {
    let total_bytes = image.total_bytes();
    let mut inner = self.inner.write();

    let entry = CachedImage {
      image,
      total_bytes,
      last_accessed: AtomicU64::new(self.stamp()),
    };
    if let Some(previous) = inner.entries.insert(key.to_string(), entry) {
      inner.usage -= previous.total_bytes;
    }
    inner.usage += total_bytes;

    if inner.usage > self.config.memory_capacity {
      self.purge(&mut inner);
    }
  }

  /// Convenience that computes the cache key from a request and filter.
  pub fn add_for_request(
    &self,
    image: Image,
    request: &ImageRequest,
    filter_identifier: Option<&str>,
  ) {
    self.add(image, &cache_key(&request.url_id(), filter_identifier));
  }

  /// Evicts entries in ascending last-access order until usage is at or
  /// below the purge floor. Equal stamps break ties by key so a single
  /// pass is deterministic.
  fn purge(&self, inner: &mut CacheInner) {
    let mut order: Vec<(u64, String)> = inner
      .entries
      .iter()
      .map(|(key, entry)| (entry.last_accessed.load(Ordering::Relaxed), key.clone()))
      .collect();
    order.sort();

    let before = inner.usage;
    let mut evicted = 0usize;
    for (_, key) in order {
      if inner.usage <= self.config.preferred_memory_usage_after_purge {
        break;
      }
      if let Some(entry) = inner.entries.remove(&key) {
        inner.usage -= entry.total_bytes;
        evicted += 1;
      }
    }

    debug!(
      evicted,
      usage_before = before,
      usage_after = inner.usage,
      "purged image cache"
    );
  }

  /// Returns the image under `key`, refreshing its last-access stamp.
  pub fn get(&self, key: &str) -> Option<Image> {
    let inner = self.inner.read();
    let entry = inner.entries.get(key)?;
    entry.last_accessed.store(self.stamp(), Ordering::Relaxed);
    Some(entry.image.clone())
  }

  /// Convenience that computes the cache key from a request and filter.
  pub fn get_for_request(
    &self,
    request: &ImageRequest,
    filter_identifier: Option<&str>,
  ) -> Option<Image> {
    self.get(&cache_key(&request.url_id(), filter_identifier))
  }

  /// Removes the entry under `key`; returns whether one existed.
  pub fn remove(&self, key: &str) -> bool {
    let mut inner = self.inner.write();
    match inner.entries.remove(key) {
      Some(entry) => {
        inner.usage -= entry.total_bytes;
        true
      }
      None => false,
    }
  }

  /// Convenience that computes the cache key from a request and filter.
  pub fn remove_for_request(
    &self,
    request: &ImageRequest,
    filter_identifier: Option<&str>,
  ) -> bool {
    self.remove(&cache_key(&request.url_id(), filter_identifier))
  }

  /// Removes every entry whose key starts with `url_id`, which covers
  /// the unfiltered entry and all filtered variants of one URL. Returns
  /// whether anything was removed.
  pub fn remove_with_prefix(&self, url_id: &str) -> bool {
    let mut inner = self.inner.write();
    let before = inner.entries.len();
    let mut freed = 0u64;
    inner.entries.retain(|key, entry| {
      if key.starts_with(url_id) {
        freed += entry.total_bytes;
        false
      } else {
        true
      }
    });
    inner.usage -= freed;
    inner.entries.len() != before
  }

  /// Removes everything; returns whether the cache held any entries.
  pub fn clear(&self) -> bool {
    let mut inner = self.inner.write();
    let had_entries = !inner.entries.is_empty();
    inner.entries.clear();
    inner.usage = 0;
    had_entries
  }

  /// Consistent snapshot of the bytes currently charged to the cache.
  pub fn memory_usage(&self) -> u64 {
    self.inner.read().usage
  }

  /// Number of cached entries.
  pub fn entry_count(&self) -> usize {
    self.inner.read().entries.len()
  }

  /// Responds to an external memory-pressure signal by dropping every
  /// entry.
  pub fn on_memory_warning(&self) {
    debug!("memory warning received, clearing image cache");
    self.clear();
  }
}

impl std::fmt::Debug for AutoPurgingImageCache {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let inner = self.inner.read();
    f.debug_struct("AutoPurgingImageCache")
      .field("entries", &inner.entries.len())
      .field("usage", &inner.usage)
      .field("capacity", &self.config.memory_capacity)
      .finish()
  }
}
