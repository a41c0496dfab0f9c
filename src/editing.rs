//! Per-record "last seen" timestamps for records open in an editor.

use chrono::{SecondsFormat, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::remote::{RecordId, Table};

/// Remembers the `updated_at` a user saw when they opened a record.
///
/// A marker lives from `start` until `clear` (save, cancel or successful
/// update). Starting again for the same record overwrites the old marker.
#[derive(Debug, Default)]
pub struct EditTracker {
  markers: Mutex<HashMap<(Table, RecordId), String>>,
}

impl EditTracker {
  pub fn new() -> Self {
    Self::default()
  }

  /// Record the timestamp, or the current time when the record has none.
  pub fn start(&self, table: Table, id: &RecordId, updated_at: Option<&str>) {
    let stamp = updated_at
      .map(String::from)
      .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));
    self.lock().insert((table, id.clone()), stamp);
  }

  pub fn peek(&self, table: Table, id: &RecordId) -> Option<String> {
    self.lock().get(&(table, id.clone())).cloned()
  }

  pub fn clear(&self, table: Table, id: &RecordId) {
    self.lock().remove(&(table, id.clone()));
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(Table, RecordId), String>> {
    self
      .markers
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}
