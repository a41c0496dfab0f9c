//! Realtime change listener.
//!
//! Subscribes to row changes on the collaborative tables and reloads the
//! dataset when another user changes something. The feed cannot tell our own
//! writes from anyone else's, so changes arriving shortly after a local write
//! are ignored as echoes, and bursts are collapsed by a debounce before a
//! single reload runs.

mod debounce;
mod phoenix;

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

pub use debounce::Debouncer;
pub use phoenix::PhoenixFeed;

use crate::error::Result;
use crate::gateway::WriteClock;
use crate::loader::BulkLoader;
use crate::presenter::{Level, Presenter, Screen};
use crate::remote::{Record, RemoteStore, Table};

/// Tables whose changes trigger a reload.
pub const WATCHED_TABLES: &[Table] = &[
  Table::Trips,
  Table::Orders,
  Table::Drivers,
  Table::Trucks,
  Table::Expenses,
  Table::Tasks,
  Table::ChatMessages,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
  Insert,
  Update,
  Delete,
}

impl Action {
  fn past_tense(self) -> &'static str {
    match self {
      Action::Insert => "added",
      Action::Update => "updated",
      Action::Delete => "deleted",
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
  pub table: Table,
  pub action: Action,
  pub new: Option<Record>,
  pub old: Option<Record>,
}

/// An open subscription: a stream of changes plus the task feeding it.
pub struct Subscription {
  pub events: mpsc::Receiver<ChangeEvent>,
  connection: Option<JoinHandle<()>>,
}

impl Subscription {
  pub fn new(events: mpsc::Receiver<ChangeEvent>, connection: Option<JoinHandle<()>>) -> Self {
    Self { events, connection }
  }
}

/// Source of change notifications for a set of tables.
#[async_trait]
pub trait ChangeFeed: Send + Sync + 'static {
  async fn subscribe(&self, tables: &[Table]) -> Result<Subscription>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
  Stopped,
  Subscribed,
}

#[derive(Debug, Clone, Copy)]
pub struct ListenerTiming {
  /// Changes this soon after a local write are taken to be our own
  pub echo_window: Duration,
  pub debounce: Duration,
}

impl Default for ListenerTiming {
  fn default() -> Self {
    Self {
      echo_window: Duration::from_secs(2),
      debounce: Duration::from_secs(1),
    }
  }
}

pub struct RealtimeListener<S, F> {
  feed: Option<Arc<F>>,
  handler: Arc<ChangeHandler<S>>,
  pump: Option<JoinHandle<()>>,
  connection: Option<JoinHandle<()>>,
}

impl<S: RemoteStore, F: ChangeFeed> RealtimeListener<S, F> {
  /// A listener without a feed stays stopped; `start` is then a no-op.
  pub fn new(
    feed: Option<Arc<F>>,
    loader: BulkLoader<S>,
    presenter: Arc<dyn Presenter>,
    clock: Arc<WriteClock>,
    timing: ListenerTiming,
  ) -> Self {
    let handler = Arc::new(ChangeHandler {
      loader,
      presenter,
      clock,
      echo_window: timing.echo_window,
      pending: AtomicBool::new(false),
      debouncer: Debouncer::new(timing.debounce),
    });
    Self {
      feed,
      handler,
      pump: None,
      connection: None,
    }
  }

  pub fn state(&self) -> ListenerState {
    if self.pump.is_some() {
      ListenerState::Subscribed
    } else {
      ListenerState::Stopped
    }
  }

  pub async fn start(&mut self) -> Result<()> {
    if self.pump.is_some() {
      return Ok(());
    }
    let feed = match &self.feed {
      Some(feed) => Arc::clone(feed),
      None => return Ok(()),
    };

    let Subscription {
      mut events,
      connection,
    } = feed.subscribe(WATCHED_TABLES).await?;

    let handler = Arc::clone(&self.handler);
    self.pump = Some(tokio::spawn(async move {
      while let Some(event) = events.recv().await {
        handler.handle(event);
      }
      debug!("change feed closed");
    }));
    self.connection = connection;
    info!("realtime sync active");
    Ok(())
  }

  pub fn stop(&mut self) {
    let was_running = self.pump.is_some();
    if let Some(pump) = self.pump.take() {
      pump.abort();
    }
    if let Some(connection) = self.connection.take() {
      connection.abort();
    }
    self.handler.debouncer.cancel();
    self.handler.pending.store(false, Ordering::SeqCst);
    if was_running {
      info!("realtime sync stopped");
    }
  }
}

impl<S, F> Drop for RealtimeListener<S, F> {
  fn drop(&mut self) {
    if let Some(pump) = self.pump.take() {
      pump.abort();
    }
    if let Some(connection) = self.connection.take() {
      connection.abort();
    }
    // A scheduled reload holds its own handle to the handler.
    self.handler.debouncer.cancel();
  }
}

struct ChangeHandler<S> {
  loader: BulkLoader<S>,
  presenter: Arc<dyn Presenter>,
  clock: Arc<WriteClock>,
  echo_window: Duration,
  pending: AtomicBool,
  debouncer: Debouncer,
}

impl<S: RemoteStore> ChangeHandler<S> {
  fn handle(self: &Arc<Self>, event: ChangeEvent) {
    if event.table == Table::ChatMessages {
      self.handle_chat(event);
      return;
    }
    if self.clock.within(self.echo_window) {
      trace!(table = %event.table, "ignoring echo of local write");
      return;
    }

    self.pending.store(true, Ordering::SeqCst);
    let this = Arc::clone(self);
    self.debouncer.schedule(async move { this.fire(event).await });
  }

  /// Runs once the burst has settled; `event` is the last one received.
  async fn fire(&self, event: ChangeEvent) {
    if !self.pending.swap(false, Ordering::SeqCst) {
      return;
    }

    let message = format!(
      "{} {} by another user",
      event.table.label(),
      event.action.past_tense()
    );
    self.presenter.notify(Level::Info, &message);

    if let Err(e) = self.loader.load_all(true).await {
      warn!(error = %e, "reload after remote change failed");
    }
    self.presenter.render();
  }

  fn handle_chat(self: &Arc<Self>, event: ChangeEvent) {
    if self.presenter.screen() != Screen::Chat {
      return;
    }
    if self.clock.within(self.echo_window) {
      trace!("ignoring echo of local chat message");
      return;
    }

    debug!(action = ?event.action, "chat changed");
    let this = Arc::clone(self);
    tokio::spawn(async move {
      if let Err(e) = this.loader.load_all(true).await {
        warn!(error = %e, "chat reload failed");
        return;
      }
      if this.presenter.screen() == Screen::Chat {
        this.presenter.render_chat();
      }
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::LocalCache;
  use crate::editing::EditTracker;
  use crate::gateway::Gateway;
  use crate::presenter::testing::RecordingPresenter;
  use crate::remote::memory::MemoryStore;
  use std::sync::atomic::Ordering as AtomicOrdering;
  use std::sync::Mutex;

  /// Feed whose events are pushed by the test.
  struct ManualFeed {
    events: Mutex<Option<mpsc::Receiver<ChangeEvent>>>,
  }

  #[async_trait]
  impl ChangeFeed for ManualFeed {
    async fn subscribe(&self, _tables: &[Table]) -> Result<Subscription> {
      let events = self
        .events
        .lock()
        .unwrap()
        .take()
        .expect("subscribed twice");
      Ok(Subscription::new(events, None))
    }
  }

  struct Fixture {
    listener: RealtimeListener<MemoryStore, ManualFeed>,
    tx: mpsc::Sender<ChangeEvent>,
    store: Arc<MemoryStore>,
    presenter: Arc<RecordingPresenter>,
    clock: Arc<WriteClock>,
  }

  fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(WriteClock::default());
    let gateway = Gateway::new(
      Arc::clone(&store),
      Arc::new(LocalCache::new(Duration::from_secs(300))),
      Arc::new(EditTracker::new()),
      Arc::clone(&clock),
    );
    let presenter = Arc::new(RecordingPresenter::default());
    let loader = BulkLoader::new(gateway, Default::default(), presenter.clone());

    let (tx, rx) = mpsc::channel(16);
    let feed = Arc::new(ManualFeed {
      events: Mutex::new(Some(rx)),
    });
    let listener = RealtimeListener::new(
      Some(feed),
      loader,
      presenter.clone(),
      Arc::clone(&clock),
      ListenerTiming::default(),
    );
    Fixture {
      listener,
      tx,
      store,
      presenter,
      clock,
    }
  }

  fn change(table: Table, action: Action) -> ChangeEvent {
    ChangeEvent {
      table,
      action,
      new: Some(Record::new().with("id", 1)),
      old: None,
    }
  }

  /// Number of full reloads so far; each one fetches trips exactly once.
  fn reloads(store: &MemoryStore) -> usize {
    store.fetches_of(Table::Trips)
  }

  #[tokio::test(start_paused = true)]
  async fn test_start_and_stop() {
    let mut f = fixture();
    assert_eq!(f.listener.state(), ListenerState::Stopped);

    f.listener.start().await.unwrap();
    assert_eq!(f.listener.state(), ListenerState::Subscribed);

    // Already subscribed: must not subscribe again.
    f.listener.start().await.unwrap();

    f.listener.stop();
    assert_eq!(f.listener.state(), ListenerState::Stopped);
  }

  #[tokio::test(start_paused = true)]
  async fn test_start_without_feed_is_noop() {
    let f = fixture();
    let loader = f.listener.handler.loader.clone();
    let mut listener: RealtimeListener<MemoryStore, ManualFeed> = RealtimeListener::new(
      None,
      loader,
      f.presenter.clone(),
      f.clock.clone(),
      ListenerTiming::default(),
    );
    listener.start().await.unwrap();
    assert_eq!(listener.state(), ListenerState::Stopped);
  }

  #[tokio::test(start_paused = true)]
  async fn test_remote_change_reloads_once_after_debounce() {
    let mut f = fixture();
    f.listener.start().await.unwrap();

    f.tx.send(change(Table::Trips, Action::Update)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(reloads(&f.store), 0);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(reloads(&f.store), 1);
    assert_eq!(
      f.presenter.notes(),
      vec![(Level::Info, "Trip updated by another user".to_string())]
    );
    assert!(f.presenter.render_count() >= 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_burst_is_coalesced() {
    let mut f = fixture();
    f.listener.start().await.unwrap();

    for _ in 0..3 {
      f.tx.send(change(Table::Orders, Action::Insert)).await.unwrap();
      tokio::time::sleep(Duration::from_millis(100)).await;
    }
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(reloads(&f.store), 1);
    assert_eq!(
      f.presenter.notes(),
      vec![(Level::Info, "Vehicle added by another user".to_string())]
    );
  }

  #[tokio::test(start_paused = true)]
  async fn test_echo_of_local_write_is_ignored() {
    let mut f = fixture();
    f.listener.start().await.unwrap();

    f.clock.stamp();
    tokio::time::sleep(Duration::from_millis(500)).await;
    f.tx.send(change(Table::Trips, Action::Update)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(reloads(&f.store), 0);
    assert!(f.presenter.notes().is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_change_after_echo_window_is_processed() {
    let mut f = fixture();
    f.listener.start().await.unwrap();

    f.clock.stamp();
    tokio::time::sleep(Duration::from_millis(2500)).await;
    f.tx.send(change(Table::Trips, Action::Delete)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(reloads(&f.store), 1);
    assert_eq!(
      f.presenter.notes(),
      vec![(Level::Info, "Trip deleted by another user".to_string())]
    );
  }

  #[tokio::test(start_paused = true)]
  async fn test_stop_cancels_pending_reload() {
    let mut f = fixture();
    f.listener.start().await.unwrap();

    f.tx.send(change(Table::Trips, Action::Update)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    f.listener.stop();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(reloads(&f.store), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_dropping_listener_cancels_pending_reload() {
    let Fixture {
      mut listener,
      tx,
      store,
      ..
    } = fixture();
    listener.start().await.unwrap();

    tx.send(change(Table::Trips, Action::Update)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    drop(listener);
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(reloads(&store), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_chat_change_only_reloads_on_chat_screen() {
    let mut f = fixture();
    f.listener.start().await.unwrap();

    f.tx.send(change(Table::ChatMessages, Action::Insert)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(reloads(&f.store), 0);

    f.presenter.set_screen(Screen::Chat);
    f.tx.send(change(Table::ChatMessages, Action::Insert)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(reloads(&f.store), 1);
    assert_eq!(f.presenter.chat_renders.load(AtomicOrdering::SeqCst), 1);
    assert!(f.presenter.notes().is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_chat_echo_is_ignored() {
    let mut f = fixture();
    f.listener.start().await.unwrap();
    f.presenter.set_screen(Screen::Chat);

    f.clock.stamp();
    f.tx.send(change(Table::ChatMessages, Action::Insert)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(reloads(&f.store), 0);
  }
}
