//! In-memory remote store for tests.

use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Mutex;

use super::filter::Query;
use super::types::{Record, RecordId, Table};
use super::RemoteStore;
use crate::error::{Result, SyncError, WriteOp};

#[derive(Default)]
pub struct MemoryStore {
  rows: Mutex<HashMap<Table, Vec<Record>>>,
  failing: Mutex<HashSet<Table>>,
  next_id: AtomicUsize,
  fetches: Mutex<Vec<Table>>,
  writes: AtomicUsize,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self {
      next_id: AtomicUsize::new(1000),
      ..Default::default()
    }
  }

  pub fn seed(&self, table: Table, rows: Vec<Record>) {
    self.rows.lock().unwrap().insert(table, rows);
  }

  /// Make every operation on `table` fail as if the table did not exist.
  pub fn fail(&self, table: Table) {
    self.failing.lock().unwrap().insert(table);
  }

  pub fn rows(&self, table: Table) -> Vec<Record> {
    self
      .rows
      .lock()
      .unwrap()
      .get(&table)
      .cloned()
      .unwrap_or_default()
  }

  pub fn fetch_count(&self) -> usize {
    self.fetches.lock().unwrap().len()
  }

  pub fn fetches_of(&self, table: Table) -> usize {
    self
      .fetches
      .lock()
      .unwrap()
      .iter()
      .filter(|t| **t == table)
      .count()
  }

  pub fn write_count(&self) -> usize {
    self.writes.load(AtomicOrdering::SeqCst)
  }

  /// Change a row behind the client's back, as another user would.
  pub fn touch(&self, table: Table, id: &RecordId, updated_at: &str) {
    let mut rows = self.rows.lock().unwrap();
    if let Some(row) = rows
      .get_mut(&table)
      .and_then(|rows| rows.iter_mut().find(|r| r.id().as_ref() == Some(id)))
    {
      row.insert("updated_at", updated_at);
    }
  }

  fn check(&self, table: Table) -> std::result::Result<(), String> {
    if self.failing.lock().unwrap().contains(&table) {
      Err(format!("relation \"public.{}\" does not exist", table))
    } else {
      Ok(())
    }
  }
}

#[async_trait]
impl RemoteStore for MemoryStore {
  async fn fetch(&self, table: Table, query: &Query) -> Result<Vec<Record>> {
    self.fetches.lock().unwrap().push(table);
    self
      .check(table)
      .map_err(|message| SyncError::fetch(table.as_str(), message))?;

    let mut rows: Vec<Record> = self
      .rows(table)
      .into_iter()
      .filter(|row| {
        query
          .filters
          .iter()
          .all(|(field, filter)| filter.matches(row.get(field)))
      })
      .collect();

    if let Some(order) = &query.order {
      rows.sort_by(|a, b| {
        let ord = compare_values(a.get(&order.column), b.get(&order.column));
        if order.ascending {
          ord
        } else {
          ord.reverse()
        }
      });
    }

    if let Some(select) = query.select.as_deref().filter(|s| *s != "*") {
      let columns: Vec<&str> = select.split(',').map(str::trim).collect();
      rows = rows
        .into_iter()
        .map(|row| {
          let mut projected = Record::new();
          for column in &columns {
            if let Some(value) = row.get(column) {
              projected.insert(column, value.clone());
            }
          }
          projected
        })
        .collect();
    }

    Ok(rows)
  }

  async fn insert(&self, table: Table, record: &Record) -> Result<Record> {
    self.writes.fetch_add(1, AtomicOrdering::SeqCst);
    self
      .check(table)
      .map_err(|message| SyncError::write(table.as_str(), WriteOp::Insert, message))?;

    let mut row = record.clone();
    if row.id().is_none() {
      let id = self.next_id.fetch_add(1, AtomicOrdering::SeqCst);
      row.insert("id", id as u64);
    }
    self
      .rows
      .lock()
      .unwrap()
      .entry(table)
      .or_default()
      .push(row.clone());
    Ok(row)
  }

  async fn update(&self, table: Table, id: &RecordId, record: &Record) -> Result<Record> {
    self.writes.fetch_add(1, AtomicOrdering::SeqCst);
    self
      .check(table)
      .map_err(|message| SyncError::write(table.as_str(), WriteOp::Update, message))?;

    let mut rows = self.rows.lock().unwrap();
    let row = rows
      .get_mut(&table)
      .and_then(|rows| rows.iter_mut().find(|r| r.id().as_ref() == Some(id)))
      .ok_or_else(|| SyncError::write(table.as_str(), WriteOp::Update, "no rows matched"))?;

    for (field, value) in record.fields() {
      row.insert(field, value.clone());
    }
    Ok(row.clone())
  }

  async fn delete(&self, table: Table, id: &RecordId) -> Result<()> {
    self.writes.fetch_add(1, AtomicOrdering::SeqCst);
    self
      .check(table)
      .map_err(|message| SyncError::write(table.as_str(), WriteOp::Delete, message))?;

    if let Some(rows) = self.rows.lock().unwrap().get_mut(&table) {
      rows.retain(|r| r.id().as_ref() != Some(id));
    }
    Ok(())
  }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
  match (a, b) {
    (Some(Value::Number(x)), Some(Value::Number(y))) => x
      .as_f64()
      .partial_cmp(&y.as_f64())
      .unwrap_or(Ordering::Equal),
    (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    (None, Some(_)) => Ordering::Less,
    (Some(_), None) => Ordering::Greater,
    (None, None) => Ordering::Equal,
  }
}
