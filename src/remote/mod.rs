//! Remote store seam: row-level table operations against the backend.

mod api_types;
pub mod filter;
#[cfg(test)]
pub(crate) mod memory;
mod rest;
pub mod types;

use async_trait::async_trait;

use crate::error::Result;

pub use filter::{Filter, Order, Query};
pub use rest::RestStore;
pub use types::{Record, RecordId, Table};

/// Table operations the gateway needs from the backend.
///
/// Implementations return the remote store's own error messages inside
/// [`crate::SyncError`] so callers can surface them unchanged.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
  async fn fetch(&self, table: Table, query: &Query) -> Result<Vec<Record>>;

  /// Insert a single row and return it as stored.
  async fn insert(&self, table: Table, record: &Record) -> Result<Record>;

  async fn update(&self, table: Table, id: &RecordId, record: &Record) -> Result<Record>;

  async fn delete(&self, table: Table, id: &RecordId) -> Result<()>;
}
