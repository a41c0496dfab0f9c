//! Remote data gateway: the only path from the client to the backend tables.
//!
//! Every successful write stamps the last-local-write clock (so the realtime
//! listener can ignore our own echoes) and invalidates the cached dataset.

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::cache::{LocalCache, APP_DATA_KEY};
use crate::dataset::AppDataset;
use crate::editing::EditTracker;
use crate::error::Result;
use crate::remote::{Query, Record, RecordId, RemoteStore, Table};

/// When this client last wrote to the backend.
#[derive(Debug, Default)]
pub struct WriteClock {
  last: Mutex<Option<Instant>>,
}

impl WriteClock {
  pub fn stamp(&self) {
    *self.lock() = Some(Instant::now());
  }

  /// Time since the last local write, or `None` if there has been none.
  pub fn since_last_write(&self) -> Option<Duration> {
    self.lock().map(|at| at.elapsed())
  }

  /// Whether a change seen now could be the echo of our own write.
  pub fn within(&self, window: Duration) -> bool {
    self
      .since_last_write()
      .map(|elapsed| elapsed < window)
      .unwrap_or(false)
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
    self
      .last
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

/// Who performed an action, for the activity log.
#[derive(Debug, Clone, Default)]
pub struct Actor {
  pub id: Option<String>,
  pub email: Option<String>,
  pub name: Option<String>,
  pub role: Option<String>,
}

pub struct Gateway<S> {
  store: Arc<S>,
  cache: Arc<LocalCache<AppDataset>>,
  editing: Arc<EditTracker>,
  clock: Arc<WriteClock>,
}

impl<S> Clone for Gateway<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      cache: Arc::clone(&self.cache),
      editing: Arc::clone(&self.editing),
      clock: Arc::clone(&self.clock),
    }
  }
}

impl<S: RemoteStore> Gateway<S> {
  pub fn new(
    store: Arc<S>,
    cache: Arc<LocalCache<AppDataset>>,
    editing: Arc<EditTracker>,
    clock: Arc<WriteClock>,
  ) -> Self {
    Self {
      store,
      cache,
      editing,
      clock,
    }
  }

  pub fn store(&self) -> &Arc<S> {
    &self.store
  }

  pub fn cache(&self) -> &Arc<LocalCache<AppDataset>> {
    &self.cache
  }

  pub fn editing(&self) -> &Arc<EditTracker> {
    &self.editing
  }

  pub fn clock(&self) -> &Arc<WriteClock> {
    &self.clock
  }

  /// Fetch rows. Remote errors propagate unchanged.
  pub async fn fetch(&self, table: Table, query: &Query) -> Result<Vec<Record>> {
    let rows = self.store.fetch(table, query).await?;
    debug!(%table, rows = rows.len(), "fetched");
    Ok(rows)
  }

  pub async fn insert(&self, table: Table, record: &Record) -> Result<Record> {
    let created = self.store.insert(table, record).await?;
    self.after_write();
    debug!(%table, id = ?created.id(), "inserted");
    Ok(created)
  }

  /// Update a row without any conflict check, and drop its edit marker.
  pub async fn update(&self, table: Table, id: &RecordId, record: &Record) -> Result<Record> {
    let updated = self.store.update(table, id, record).await?;
    self.after_write();
    self.editing.clear(table, id);
    debug!(%table, %id, "updated");
    Ok(updated)
  }

  pub async fn delete(&self, table: Table, id: &RecordId) -> Result<()> {
    self.store.delete(table, id).await?;
    self.after_write();
    debug!(%table, %id, "deleted");
    Ok(())
  }

  /// Append to the activity log. The table is optional on some deployments,
  /// so failures are only logged.
  pub async fn log_activity(&self, action: &str, actor: Option<&Actor>, details: Value) {
    let actor = actor.cloned().unwrap_or_default();
    let email = actor
      .email
      .or_else(|| details.get("email").and_then(Value::as_str).map(String::from))
      .unwrap_or_else(|| "unknown".to_string());
    let name = actor
      .name
      .map(|n| n.trim().to_string())
      .filter(|n| !n.is_empty())
      .or_else(|| {
        details
          .get("user_name")
          .and_then(Value::as_str)
          .filter(|n| !n.is_empty())
          .map(String::from)
      })
      .unwrap_or_else(|| "System".to_string());

    let entry = Record::new()
      .with("user_id", actor.id.map(Value::from).unwrap_or(Value::Null))
      .with("user_email", email)
      .with("user_name", name)
      .with("action", action)
      .with("details", details.to_string())
      .with("ip_address", "client")
      .with(
        "created_at",
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
      );

    if let Err(e) = self.insert(Table::ActivityLog, &entry).await {
      info!(action, error = %e, "activity not logged");
    }
  }

  fn after_write(&self) {
    self.clock.stamp();
    self.cache.invalidate(Some(APP_DATA_KEY));
  }
}
