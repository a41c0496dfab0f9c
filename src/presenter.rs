//! Seam between the sync layer and whatever draws the screen.
//!
//! The sync layer never renders or prompts by itself. It reports through a
//! [`Presenter`]: short notifications, "redraw now" requests, the screen the
//! user is looking at, and the answer to an overwrite prompt.

use async_trait::async_trait;
use std::sync::Mutex;
use tracing::{error, info, warn};

use crate::conflict::{ConflictInfo, Resolution};
use crate::remote::{RecordId, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
  Info,
  Success,
  Warning,
  Error,
}

/// What the user is currently looking at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Screen {
  #[default]
  Other,
  /// A single record's detail page; background reloads must not navigate away
  Detail { table: Table, id: RecordId },
  Chat,
}

#[async_trait]
pub trait Presenter: Send + Sync + 'static {
  /// Show a transient message.
  fn notify(&self, level: Level, message: &str);

  /// Redraw the current page from the dataset.
  fn render(&self);

  /// Redraw only the chat view.
  fn render_chat(&self) {
    self.render();
  }

  fn screen(&self) -> Screen;

  /// Ask the user what to do about a concurrent edit.
  async fn resolve_conflict(&self, info: &ConflictInfo) -> Resolution;
}

/// Headless presenter: notifications go to the log and conflicts get a fixed
/// answer.
#[derive(Debug)]
pub struct TracingPresenter {
  resolution: Resolution,
  screen: Mutex<Screen>,
}

impl TracingPresenter {
  pub fn new(resolution: Resolution) -> Self {
    Self {
      resolution,
      screen: Mutex::new(Screen::Other),
    }
  }

  pub fn set_screen(&self, screen: Screen) {
    *self
      .screen
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner()) = screen;
  }
}

#[async_trait]
impl Presenter for TracingPresenter {
  fn notify(&self, level: Level, message: &str) {
    match level {
      Level::Info | Level::Success => info!(target: "tms_sync::notify", "{}", message),
      Level::Warning => warn!(target: "tms_sync::notify", "{}", message),
      Level::Error => error!(target: "tms_sync::notify", "{}", message),
    }
  }

  fn render(&self) {
    info!("dataset changed");
  }

  fn screen(&self) -> Screen {
    self
      .screen
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
      .clone()
  }

  async fn resolve_conflict(&self, info: &ConflictInfo) -> Resolution {
    warn!(
      table = %info.table,
      id = %info.id,
      remembered = %info.remembered,
      current = %info.current,
      resolution = ?self.resolution,
      "record was modified by another user while being edited"
    );
    self.resolution
  }
}
