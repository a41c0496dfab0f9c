//! The session context: one place that owns the dataset, the cache and the
//! components that keep them in sync with the backend.

use std::sync::Arc;
use tracing::{info, warn};

use crate::cache::LocalCache;
use crate::config::SyncConfig;
use crate::conflict::{ConflictCheck, ConflictResolver, Outcome};
use crate::dataset::AppDataset;
use crate::dealer::DealerPortal;
use crate::editing::EditTracker;
use crate::error::Result;
use crate::gateway::{Actor, Gateway, WriteClock};
use crate::loader::{self, BulkLoader, LoadOutcome, SharedDataset};
use crate::presenter::{Level, Presenter};
use crate::realtime::{ChangeFeed, ListenerTiming, RealtimeListener};
use crate::remote::{Query, Record, RecordId, RemoteStore, Table};

pub struct Session<S> {
  gateway: Gateway<S>,
  loader: BulkLoader<S>,
  dataset: SharedDataset,
  presenter: Arc<dyn Presenter>,
  timing: ListenerTiming,
}

impl<S: RemoteStore> Session<S> {
  pub fn new(store: S, presenter: Arc<dyn Presenter>, settings: &SyncConfig) -> Self {
    let gateway = Gateway::new(
      Arc::new(store),
      Arc::new(LocalCache::new(settings.cache_max_age())),
      Arc::new(EditTracker::new()),
      Arc::new(WriteClock::default()),
    );
    let dataset = SharedDataset::default();
    let loader = BulkLoader::new(gateway.clone(), Arc::clone(&dataset), Arc::clone(&presenter));

    Self {
      gateway,
      loader,
      dataset,
      presenter,
      timing: ListenerTiming {
        echo_window: settings.echo_window(),
        debounce: settings.debounce(),
      },
    }
  }

  pub fn gateway(&self) -> &Gateway<S> {
    &self.gateway
  }

  /// See [`BulkLoader::load_all`].
  pub async fn load_all(&self, force: bool) -> Result<LoadOutcome> {
    self.loader.load_all(force).await
  }

  pub async fn fetch(&self, table: Table, query: &Query) -> Result<Vec<Record>> {
    self.gateway.fetch(table, query).await
  }

  pub async fn insert(&self, table: Table, record: &Record) -> Result<Record> {
    self.gateway.insert(table, record).await
  }

  /// Update a row, first checking whether someone else saved it since the
  /// user opened it.
  ///
  /// Returns `Ok(None)` when the user chose to refresh instead of
  /// overwriting: nothing was written and the caller should not proceed.
  pub async fn update(
    &self,
    table: Table,
    id: &RecordId,
    record: &Record,
    skip_conflict_check: bool,
  ) -> Result<Option<Record>> {
    if !skip_conflict_check {
      if let ConflictCheck::Conflict(info) = ConflictResolver::check(&self.gateway, table, id).await {
        let resolution = self.presenter.resolve_conflict(&info).await;
        if Outcome::from(resolution) == Outcome::Aborted {
          info!(%table, %id, "update abandoned after conflict");
          if let Err(e) = self.loader.load_all(true).await {
            warn!(error = %e, "refresh after conflict failed");
          }
          self
            .presenter
            .notify(Level::Info, "Data refreshed - please review and try again");
          return Ok(None);
        }
        info!(%table, %id, "overwriting concurrent edit");
      }
    }

    self.gateway.update(table, id, record).await.map(Some)
  }

  pub async fn delete(&self, table: Table, id: &RecordId) -> Result<()> {
    self.gateway.delete(table, id).await
  }

  /// Remember the version of a record the user just opened for editing.
  pub fn start_editing(&self, table: Table, id: &RecordId, updated_at: Option<&str>) {
    self.gateway.editing().start(table, id, updated_at);
  }

  pub fn clear_editing(&self, table: Table, id: &RecordId) {
    self.gateway.editing().clear(table, id);
  }

  /// Drop the cached dataset so the next load goes to the network.
  pub fn invalidate_cache(&self) {
    self.gateway.cache().invalidate(None);
  }

  /// Copy of the current dataset.
  pub fn dataset(&self) -> AppDataset {
    loader::read(&self.dataset).clone()
  }

  /// Field-level edits by the presentation layer.
  pub fn with_dataset_mut<R>(&self, edit: impl FnOnce(&mut AppDataset) -> R) -> R {
    edit(&mut loader::write(&self.dataset))
  }

  /// Dealer portal acting as `user`.
  pub fn dealer_portal(&self, user: Option<Actor>) -> DealerPortal<S> {
    DealerPortal::new(self.gateway.clone(), user)
  }

  /// A stopped realtime listener wired to this session.
  pub fn realtime<F: ChangeFeed>(&self, feed: Option<Arc<F>>) -> RealtimeListener<S, F> {
    RealtimeListener::new(
      feed,
      self.loader.clone(),
      Arc::clone(&self.presenter),
      Arc::clone(self.gateway.clock()),
      self.timing,
    )
  }
}
