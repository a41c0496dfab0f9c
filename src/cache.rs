//! Time-boxed in-memory cache.
//!
//! Entries expire lazily: nothing runs in the background, `get` simply drops
//! an entry it finds to be older than the max age. There is no size bound;
//! in practice the only key is the aggregated dataset.
//!
//! Every invalidation bumps a generation counter. A writer that read the
//! backend before an invalidation can use [`LocalCache::set_if_current`] so
//! it never puts back data the invalidation was meant to drop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Cache key under which the bulk loader stores the aggregated dataset.
pub const APP_DATA_KEY: &str = "appData";

#[derive(Debug)]
struct Entry<V> {
  value: V,
  stored_at: Instant,
}

#[derive(Debug)]
pub struct LocalCache<V> {
  entries: Mutex<HashMap<String, Entry<V>>>,
  generation: AtomicU64,
  max_age: Duration,
}

impl<V: Clone> LocalCache<V> {
  pub fn new(max_age: Duration) -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
      generation: AtomicU64::new(0),
      max_age,
    }
  }

  pub fn max_age(&self) -> Duration {
    self.max_age
  }

  pub fn set(&self, key: &str, value: V) {
    let entry = Entry {
      value,
      stored_at: Instant::now(),
    };
    self.lock().insert(key.to_string(), entry);
  }

  /// Current invalidation generation.
  pub fn generation(&self) -> u64 {
    self.generation.load(Ordering::SeqCst)
  }

  /// Store `value` only if nothing was invalidated since `generation` was
  /// read. Returns whether the value was stored.
  pub fn set_if_current(&self, key: &str, value: V, generation: u64) -> bool {
    let mut entries = self.lock();
    if self.generation() != generation {
      return false;
    }
    entries.insert(
      key.to_string(),
      Entry {
        value,
        stored_at: Instant::now(),
      },
    );
    true
  }

  /// Return the value if present and younger than the max age. An expired
  /// entry is removed on the way out.
  pub fn get(&self, key: &str) -> Option<V> {
    let mut entries = self.lock();
    let expired = match entries.get(key) {
      None => return None,
      Some(entry) => entry.stored_at.elapsed() > self.max_age,
    };

    if expired {
      entries.remove(key);
      tracing::debug!(key, "cache entry expired");
      return None;
    }
    entries.get(key).map(|entry| entry.value.clone())
  }

  /// Drop one key, or everything when `key` is `None`.
  pub fn invalidate(&self, key: Option<&str>) {
    let mut entries = self.lock();
    self.generation.fetch_add(1, Ordering::SeqCst);
    match key {
      Some(key) => {
        entries.remove(key);
      }
      None => entries.clear(),
    }
  }

  /// Number of stored entries, expired or not.
  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry<V>>> {
    // A panic while holding the lock leaves the map itself intact.
    self
      .entries
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}
