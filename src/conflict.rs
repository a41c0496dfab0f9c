//! Save-time conflict detection for records edited concurrently.
//!
//! When a user opens a record we remember its `updated_at` (see
//! [`crate::editing`]). Before saving, the record's current `updated_at` is
//! re-read; if it moved, someone else saved in the meantime and the caller
//! has to choose between overwriting and refreshing. There is no merge.
//!
//! The lookup is best effort: if it fails, or the table has no `updated_at`
//! column, the save goes ahead as if there were no conflict.

use serde::Deserialize;
use tracing::warn;

use crate::gateway::Gateway;
use crate::remote::{Query, RecordId, RemoteStore, Table};

/// Tables whose updates are checked for concurrent edits.
pub const CHECKED_TABLES: &[Table] = &[
  Table::Trips,
  Table::Orders,
  Table::Drivers,
  Table::Trucks,
  Table::Expenses,
  Table::Brokers,
  Table::MaintenanceRecords,
  Table::FuelTransactions,
];

/// The user's answer to "this record changed while you were editing".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
  /// Save anyway, replacing the other user's changes
  Overwrite,
  /// Drop this save and reload the latest data
  #[default]
  Refresh,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictInfo {
  pub table: Table,
  pub id: RecordId,
  /// `updated_at` when the editor was opened
  pub remembered: String,
  /// `updated_at` now
  pub current: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictCheck {
  Clear,
  Conflict(ConflictInfo),
}

/// What the caller should do with the pending write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
  Proceed,
  Aborted,
}

impl From<Resolution> for Outcome {
  fn from(resolution: Resolution) -> Self {
    match resolution {
      Resolution::Overwrite => Outcome::Proceed,
      Resolution::Refresh => Outcome::Aborted,
    }
  }
}

pub struct ConflictResolver;

impl ConflictResolver {
  /// Whether an update to (table, id) would clobber someone else's save.
  ///
  /// Only allow-listed tables with an open edit marker are checked.
  pub async fn check<S: RemoteStore>(
    gateway: &Gateway<S>,
    table: Table,
    id: &RecordId,
  ) -> ConflictCheck {
    if !CHECKED_TABLES.contains(&table) {
      return ConflictCheck::Clear;
    }
    let remembered = match gateway.editing().peek(table, id) {
      Some(stamp) => stamp,
      None => return ConflictCheck::Clear,
    };

    let query = Query::new()
      .select("updated_at")
      .filter("id", &format!("eq.{}", id));

    let current = match gateway.fetch(table, &query).await {
      Ok(rows) => rows
        .first()
        .and_then(|row| row.updated_at().map(String::from)),
      Err(e) => {
        warn!(%table, %id, error = %e, "conflict check skipped");
        None
      }
    };

    match current {
      Some(current) if current != remembered => ConflictCheck::Conflict(ConflictInfo {
        table,
        id: id.clone(),
        remembered,
        current,
      }),
      _ => ConflictCheck::Clear,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::LocalCache;
  use crate::editing::EditTracker;
  use crate::gateway::WriteClock;
  use crate::remote::memory::MemoryStore;
  use crate::remote::Record;
  use std::sync::Arc;
  use std::time::Duration;

  fn gateway_with_trip(updated_at: Option<&str>) -> (Gateway<MemoryStore>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let mut trip = Record::new().with("id", 5).with("origin", "Dallas");
    if let Some(stamp) = updated_at {
      trip.insert("updated_at", stamp);
    }
    store.seed(Table::Trips, vec![trip]);
    let gateway = Gateway::new(
      Arc::clone(&store),
      Arc::new(LocalCache::new(Duration::from_secs(300))),
      Arc::new(EditTracker::new()),
      Arc::new(WriteClock::default()),
    );
    (gateway, store)
  }

  #[tokio::test]
  async fn test_same_timestamp_is_clear() {
    let (gateway, _) = gateway_with_trip(Some("T0"));
    let id = RecordId::from(5);
    gateway.editing().start(Table::Trips, &id, Some("T0"));
    assert_eq!(
      ConflictResolver::check(&gateway, Table::Trips, &id).await,
      ConflictCheck::Clear
    );
  }

  #[tokio::test]
  async fn test_moved_timestamp_is_conflict() {
    let (gateway, store) = gateway_with_trip(Some("T0"));
    let id = RecordId::from(5);
    gateway.editing().start(Table::Trips, &id, Some("T0"));
    store.touch(Table::Trips, &id, "T1");

    let check = ConflictResolver::check(&gateway, Table::Trips, &id).await;
    assert_eq!(
      check,
      ConflictCheck::Conflict(ConflictInfo {
        table: Table::Trips,
        id,
        remembered: "T0".into(),
        current: "T1".into(),
      })
    );
  }

  #[tokio::test]
  async fn test_no_marker_skips_lookup() {
    let (gateway, store) = gateway_with_trip(Some("T1"));
    let check = ConflictResolver::check(&gateway, Table::Trips, &RecordId::from(5)).await;
    assert_eq!(check, ConflictCheck::Clear);
    assert_eq!(store.fetch_count(), 0);
  }

  #[tokio::test]
  async fn test_table_outside_allow_list_is_not_checked() {
    let (gateway, store) = gateway_with_trip(None);
    let id = RecordId::from(5);
    gateway.editing().start(Table::Tasks, &id, Some("T0"));
    let check = ConflictResolver::check(&gateway, Table::Tasks, &id).await;
    assert_eq!(check, ConflictCheck::Clear);
    assert_eq!(store.fetch_count(), 0);
  }

  #[tokio::test]
  async fn test_missing_updated_at_column_is_clear() {
    let (gateway, _) = gateway_with_trip(None);
    let id = RecordId::from(5);
    gateway.editing().start(Table::Trips, &id, Some("T0"));
    assert_eq!(
      ConflictResolver::check(&gateway, Table::Trips, &id).await,
      ConflictCheck::Clear
    );
  }

  #[tokio::test]
  async fn test_lookup_failure_is_clear() {
    let (gateway, store) = gateway_with_trip(Some("T1"));
    let id = RecordId::from(5);
    gateway.editing().start(Table::Trips, &id, Some("T0"));
    store.fail(Table::Trips);
    assert_eq!(
      ConflictResolver::check(&gateway, Table::Trips, &id).await,
      ConflictCheck::Clear
    );
  }

  #[test]
  fn test_resolution_to_outcome() {
    assert_eq!(Outcome::from(Resolution::Overwrite), Outcome::Proceed);
    assert_eq!(Outcome::from(Resolution::Refresh), Outcome::Aborted);
  }
}
