//! Error taxonomy for the sync layer.
//!
//! A user cancelling an overwrite after a conflict is not an error; the
//! session reports it as `Ok(None)`. Missing optional tables are absorbed by
//! the bulk loader and never surface here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
  /// A remote query failed. Carries the remote store's message unchanged.
  #[error("fetch from {table} failed: {message}")]
  Fetch { table: String, message: String },

  /// An insert, update or delete was rejected by the remote store.
  #[error("{op} on {table} failed: {message}")]
  Write {
    table: String,
    op: WriteOp,
    message: String,
  },

  /// The remote store returned something that is not a row.
  #[error("unexpected response from {table}: {message}")]
  Decode { table: String, message: String },

  #[error("unknown table: {0}")]
  UnknownTable(String),

  #[error("invalid query: {0}")]
  InvalidQuery(String),

  #[error("realtime: {0}")]
  Realtime(String),

  #[error("configuration: {0}")]
  Config(String),

  #[error("Dealer profile not found. Please contact support.")]
  MissingDealerProfile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
  Insert,
  Update,
  Delete,
}

impl std::fmt::Display for WriteOp {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(match self {
      WriteOp::Insert => "insert",
      WriteOp::Update => "update",
      WriteOp::Delete => "delete",
    })
  }
}

impl SyncError {
  pub fn fetch(table: impl Into<String>, message: impl Into<String>) -> Self {
    SyncError::Fetch {
      table: table.into(),
      message: message.into(),
    }
  }

  pub fn write(table: impl Into<String>, op: WriteOp, message: impl Into<String>) -> Self {
    SyncError::Write {
      table: table.into(),
      op,
      message: message.into(),
    }
  }

  /// The message the remote store gave, without our context prefix.
  pub fn remote_message(&self) -> Option<&str> {
    match self {
      SyncError::Fetch { message, .. } | SyncError::Write { message, .. } => Some(message),
      _ => None,
    }
  }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
