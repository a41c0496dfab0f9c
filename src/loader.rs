//! Bulk loading of the aggregated dataset.
//!
//! Essential collections are fetched in parallel and must all succeed before
//! the dataset is published. Everything else follows in a background task
//! that merges into the same dataset when it completes.

use futures::future::{join_all, try_join_all};
use std::sync::{Arc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::cache::APP_DATA_KEY;
use crate::dataset::{AppDataset, CollectionSpec, ESSENTIAL, OPTIONAL, SECONDARY};
use crate::error::Result;
use crate::gateway::Gateway;
use crate::presenter::{Level, Presenter, Screen};
use crate::remote::{Record, RemoteStore, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
  /// Adopted a fresh cached dataset; no request was made
  Cache,
  Network,
}

#[derive(Debug)]
pub struct LoadOutcome {
  pub source: LoadSource,
  /// Background load of the secondary collections, if one was started
  pub secondary: Option<JoinHandle<()>>,
}

pub type SharedDataset = Arc<RwLock<AppDataset>>;

pub struct BulkLoader<S> {
  gateway: Gateway<S>,
  dataset: SharedDataset,
  presenter: Arc<dyn Presenter>,
}

impl<S> Clone for BulkLoader<S> {
  fn clone(&self) -> Self {
    Self {
      gateway: self.gateway.clone(),
      dataset: Arc::clone(&self.dataset),
      presenter: Arc::clone(&self.presenter),
    }
  }
}

impl<S: RemoteStore> BulkLoader<S> {
  pub fn new(gateway: Gateway<S>, dataset: SharedDataset, presenter: Arc<dyn Presenter>) -> Self {
    Self {
      gateway,
      dataset,
      presenter,
    }
  }

  /// Load every collection, serving from the cache unless `force` is set.
  pub async fn load_all(&self, force: bool) -> Result<LoadOutcome> {
    if !force {
      if let Some(cached) = self.gateway.cache().get(APP_DATA_KEY) {
        debug!("dataset served from cache");
        *write(&self.dataset) = cached;
        return Ok(LoadOutcome {
          source: LoadSource::Cache,
          secondary: None,
        });
      }
    }

    let generation = self.gateway.cache().generation();
    let essential = match fetch_all(&self.gateway, ESSENTIAL).await {
      Ok(loaded) => loaded,
      Err(e) => {
        error!(error = %e, "failed to load data");
        self.presenter.notify(Level::Error, "Failed to load data");
        return Err(e);
      }
    };

    let mut fresh = AppDataset::default();
    fresh.merge(essential);
    *write(&self.dataset) = fresh.clone();
    self.store_snapshot(fresh, generation);
    info!("essential collections loaded");

    let this = self.clone();
    let secondary = tokio::spawn(async move { this.load_secondary(generation).await });

    Ok(LoadOutcome {
      source: LoadSource::Network,
      secondary: Some(secondary),
    })
  }

  async fn load_secondary(&self, generation: u64) {
    let batch = match fetch_all(&self.gateway, SECONDARY).await {
      Ok(batch) => batch,
      Err(e) => {
        error!(error = %e, "failed to load secondary data");
        return;
      }
    };

    let optional = join_all(OPTIONAL.iter().map(|spec| self.fetch_optional(spec))).await;

    let snapshot = {
      let mut dataset = write(&self.dataset);
      dataset.merge(batch);
      dataset.merge(optional);
      dataset.clone()
    };
    self.store_snapshot(snapshot, generation);
    info!("secondary collections loaded");

    if !matches!(self.presenter.screen(), Screen::Detail { .. }) {
      self.presenter.render();
    }
  }

  /// Cache a snapshot unless a write invalidated the cache after the load
  /// began; the next unforced load then goes back to the network.
  fn store_snapshot(&self, snapshot: AppDataset, generation: u64) {
    if !self
      .gateway
      .cache()
      .set_if_current(APP_DATA_KEY, snapshot, generation)
    {
      debug!("dataset changed during load, not cached");
    }
  }

  /// A table that errors (typically because it does not exist yet) loads as
  /// an empty collection.
  async fn fetch_optional(&self, spec: &CollectionSpec) -> (Table, Vec<Record>) {
    match self.gateway.fetch(spec.table, &spec.query()).await {
      Ok(rows) => (spec.table, rows),
      Err(e) => {
        debug!(table = %spec.table, error = %e, "optional collection unavailable");
        (spec.table, Vec::new())
      }
    }
  }
}

async fn fetch_all<S: RemoteStore>(
  gateway: &Gateway<S>,
  specs: &[CollectionSpec],
) -> Result<Vec<(Table, Vec<Record>)>> {
  try_join_all(specs.iter().map(|spec| async move {
    let rows = gateway.fetch(spec.table, &spec.query()).await?;
    Ok::<_, crate::SyncError>((spec.table, rows))
  }))
  .await
}

pub(crate) fn write(dataset: &SharedDataset) -> std::sync::RwLockWriteGuard<'_, AppDataset> {
  dataset
    .write()
    .unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn read(dataset: &SharedDataset) -> std::sync::RwLockReadGuard<'_, AppDataset> {
  dataset
    .read()
    .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::LocalCache;
  use crate::editing::EditTracker;
  use crate::gateway::WriteClock;
  use crate::presenter::testing::RecordingPresenter;
  use crate::remote::memory::MemoryStore;
  use crate::remote::RecordId;
  use std::time::Duration;

  struct Fixture {
    loader: BulkLoader<MemoryStore>,
    store: Arc<MemoryStore>,
    dataset: SharedDataset,
    presenter: Arc<RecordingPresenter>,
  }

  fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    for table in [Table::Trips, Table::Orders, Table::Drivers, Table::Claims] {
      store.seed(table, vec![Record::new().with("id", 1)]);
    }
    let gateway = Gateway::new(
      Arc::clone(&store),
      Arc::new(LocalCache::new(Duration::from_secs(300))),
      Arc::new(EditTracker::new()),
      Arc::new(WriteClock::default()),
    );
    let dataset = SharedDataset::default();
    let presenter = Arc::new(RecordingPresenter::default());
    let loader = BulkLoader::new(gateway, Arc::clone(&dataset), presenter.clone());
    Fixture {
      loader,
      store,
      dataset,
      presenter,
    }
  }

  async fn load_and_wait(loader: &BulkLoader<MemoryStore>, force: bool) -> LoadOutcome {
    let mut outcome = loader.load_all(force).await.unwrap();
    if let Some(handle) = outcome.secondary.take() {
      handle.await.unwrap();
    }
    outcome
  }

  #[tokio::test]
  async fn test_full_load_populates_all_tiers() {
    let f = fixture();
    let outcome = load_and_wait(&f.loader, false).await;

    assert_eq!(outcome.source, LoadSource::Network);
    let dataset = read(&f.dataset);
    assert_eq!(dataset.get(Table::Trips).len(), 1);
    assert_eq!(dataset.get(Table::Claims).len(), 1);
    assert_eq!(f.presenter.render_count(), 1);
  }

  #[tokio::test]
  async fn test_second_load_is_served_from_cache() {
    let f = fixture();
    load_and_wait(&f.loader, false).await;
    let fetches = f.store.fetch_count();

    let outcome = f.loader.load_all(false).await.unwrap();
    assert_eq!(outcome.source, LoadSource::Cache);
    assert!(outcome.secondary.is_none());
    assert_eq!(f.store.fetch_count(), fetches);
    assert_eq!(read(&f.dataset).get(Table::Claims).len(), 1);
  }

  #[tokio::test]
  async fn test_forced_load_bypasses_cache() {
    let f = fixture();
    load_and_wait(&f.loader, false).await;
    load_and_wait(&f.loader, true).await;
    assert_eq!(f.store.fetches_of(Table::Trips), 2);
  }

  #[tokio::test]
  async fn test_failing_optional_table_loads_empty() {
    let f = fixture();
    f.store.fail(Table::Claims);
    load_and_wait(&f.loader, false).await;

    let dataset = read(&f.dataset);
    assert!(dataset.get(Table::Claims).is_empty());
    assert_eq!(dataset.get(Table::Trips).len(), 1);
    assert_eq!(dataset.get(Table::Orders).len(), 1);
    assert_eq!(dataset.get(Table::Drivers).len(), 1);
  }

  #[tokio::test]
  async fn test_essential_failure_aborts_and_notifies() {
    let f = fixture();
    f.store.fail(Table::Trips);

    let err = f.loader.load_all(false).await.unwrap_err();
    assert!(matches!(err, crate::SyncError::Fetch { .. }));
    assert_eq!(
      f.presenter.notes(),
      vec![(Level::Error, "Failed to load data".to_string())]
    );
    assert!(read(&f.dataset).get(Table::Orders).is_empty());
  }

  #[tokio::test]
  async fn test_secondary_batch_failure_keeps_essentials() {
    let f = fixture();
    f.store.seed(Table::Expenses, vec![Record::new().with("id", 3)]);
    f.store.fail(Table::FixedCosts);
    load_and_wait(&f.loader, false).await;

    let dataset = read(&f.dataset);
    assert_eq!(dataset.get(Table::Trips).len(), 1);
    assert!(dataset.get(Table::Expenses).is_empty());
    assert_eq!(f.presenter.render_count(), 0);
  }

  #[tokio::test]
  async fn test_write_during_background_load_is_not_masked_by_cache() {
    let f = fixture();
    let mut outcome = f.loader.load_all(false).await.unwrap();

    f.loader
      .gateway
      .insert(Table::Trips, &Record::new().with("id", 2))
      .await
      .unwrap();
    if let Some(handle) = outcome.secondary.take() {
      handle.await.unwrap();
    }
    assert_eq!(read(&f.dataset).get(Table::Claims).len(), 1);

    let outcome = load_and_wait(&f.loader, false).await;
    assert_eq!(outcome.source, LoadSource::Network);
    assert_eq!(read(&f.dataset).get(Table::Trips).len(), 2);
    assert_eq!(f.store.rows(Table::Trips).len(), 2);
  }

  #[tokio::test]
  async fn test_detail_screen_suppresses_render() {
    let f = fixture();
    f.presenter.set_screen(Screen::Detail {
      table: Table::Trips,
      id: RecordId::from(1),
    });
    load_and_wait(&f.loader, false).await;
    assert_eq!(f.presenter.render_count(), 0);
    assert_eq!(read(&f.dataset).get(Table::Claims).len(), 1);
  }
}
