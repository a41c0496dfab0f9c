//! Client-side data synchronization for a transportation management system
//! backed by a hosted Postgres REST API and realtime feed.
//!
//! The pieces, from the wire up:
//! - [`remote`]: table operations and `op.value` filter expressions
//! - [`gateway`]: the single write path, stamping local writes and
//!   invalidating the cache
//! - [`cache`]: time-boxed storage for the loaded dataset
//! - [`editing`] and [`conflict`]: detecting concurrent edits at save time
//! - [`loader`]: essential and background loading of the dataset
//! - [`realtime`]: reloading when other users change things
//! - [`session`]: the context object tying them together
//! - [`dealer`]: the dealer portal's orders and spending

pub mod cache;
pub mod config;
pub mod conflict;
pub mod dataset;
pub mod dealer;
pub mod editing;
pub mod error;
pub mod gateway;
pub mod loader;
pub mod presenter;
pub mod realtime;
pub mod remote;
pub mod session;

pub use error::{Result, SyncError};
pub use session::Session;
