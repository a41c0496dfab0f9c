//! The aggregated application dataset: one ordered collection per table.

use std::collections::BTreeMap;

use crate::remote::{Query, Record, RecordId, Table};

/// Collections the dataset always carries, even before they are loaded.
pub const COLLECTIONS: &[Table] = &[
  Table::Users,
  Table::Trucks,
  Table::Drivers,
  Table::LocalDrivers,
  Table::Dispatchers,
  Table::Trips,
  Table::Orders,
  Table::Expenses,
  Table::FixedCosts,
  Table::VariableCosts,
  Table::DriverFiles,
  Table::TruckFiles,
  Table::Brokers,
  Table::FuelTransactions,
  Table::MaintenanceRecords,
  Table::Claims,
  Table::Tickets,
  Table::Violations,
  Table::TicketFiles,
  Table::ViolationFiles,
  Table::ClaimFiles,
  Table::ComplianceTasks,
  Table::Accidents,
  Table::CompanyFiles,
  Table::Tasks,
  Table::Dealers,
];

/// How one collection is fetched.
#[derive(Debug, Clone, Copy)]
pub struct CollectionSpec {
  pub table: Table,
  pub order: Option<&'static str>,
}

impl CollectionSpec {
  const fn new(table: Table, order: Option<&'static str>) -> Self {
    Self { table, order }
  }

  pub fn query(&self) -> Query {
    match self.order {
      Some(order) => Query::new().order(order),
      None => Query::new(),
    }
  }
}

/// Needed before the first screen can render.
pub const ESSENTIAL: &[CollectionSpec] = &[
  CollectionSpec::new(Table::Users, None),
  CollectionSpec::new(Table::Trucks, Some("truck_number")),
  CollectionSpec::new(Table::Drivers, None),
  CollectionSpec::new(Table::Dispatchers, None),
  CollectionSpec::new(Table::Trips, Some("trip_date.desc")),
  CollectionSpec::new(Table::Orders, Some("id.desc")),
  CollectionSpec::new(Table::Brokers, Some("name")),
  CollectionSpec::new(Table::Tasks, Some("due_date.asc")),
];

/// Loaded in the background as one batch; any failure drops the batch.
pub const SECONDARY: &[CollectionSpec] = &[
  CollectionSpec::new(Table::LocalDrivers, Some("name")),
  CollectionSpec::new(Table::Expenses, None),
  CollectionSpec::new(Table::FixedCosts, Some("name")),
  CollectionSpec::new(Table::VariableCosts, Some("date.desc")),
  CollectionSpec::new(Table::DriverFiles, Some("id.desc")),
  CollectionSpec::new(Table::TruckFiles, Some("id.desc")),
  CollectionSpec::new(Table::FuelTransactions, Some("transaction_date.desc")),
  CollectionSpec::new(Table::MaintenanceRecords, Some("service_date.desc")),
];

/// Loaded in the background one at a time; tables that may not exist yet.
pub const OPTIONAL: &[CollectionSpec] = &[
  CollectionSpec::new(Table::Claims, Some("incident_date.desc")),
  CollectionSpec::new(Table::Tickets, Some("ticket_date.desc")),
  CollectionSpec::new(Table::Violations, Some("violation_date.desc")),
  CollectionSpec::new(Table::TicketFiles, None),
  CollectionSpec::new(Table::ViolationFiles, None),
  CollectionSpec::new(Table::ClaimFiles, None),
  CollectionSpec::new(Table::ComplianceTasks, Some("next_due_date.asc")),
  CollectionSpec::new(Table::Accidents, Some("accident_date.desc")),
  CollectionSpec::new(Table::CompanyFiles, Some("id.desc")),
  CollectionSpec::new(Table::Dealers, Some("company_name")),
];

#[derive(Debug, Clone, PartialEq)]
pub struct AppDataset {
  collections: BTreeMap<Table, Vec<Record>>,
}

impl Default for AppDataset {
  fn default() -> Self {
    Self {
      collections: COLLECTIONS.iter().map(|t| (*t, Vec::new())).collect(),
    }
  }
}

impl AppDataset {
  /// Records of a collection; empty if it has not been loaded.
  pub fn get(&self, table: Table) -> &[Record] {
    self
      .collections
      .get(&table)
      .map(Vec::as_slice)
      .unwrap_or(&[])
  }

  /// Mutable access for the presentation layer's field-level edits.
  pub fn records_mut(&mut self, table: Table) -> &mut Vec<Record> {
    self.collections.entry(table).or_default()
  }

  /// Replace a whole collection.
  pub fn set(&mut self, table: Table, records: Vec<Record>) {
    self.collections.insert(table, records);
  }

  /// Replace every collection present in `loaded`, leaving the rest alone.
  pub fn merge(&mut self, loaded: impl IntoIterator<Item = (Table, Vec<Record>)>) {
    for (table, records) in loaded {
      self.set(table, records);
    }
  }

  pub fn find(&self, table: Table, id: &RecordId) -> Option<&Record> {
    self
      .get(table)
      .iter()
      .find(|record| record.id().as_ref() == Some(id))
  }

  /// Row count per collection, in table order.
  pub fn counts(&self) -> Vec<(Table, usize)> {
    self
      .collections
      .iter()
      .map(|(table, records)| (*table, records.len()))
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn test_every_loaded_collection_is_present_when_empty() {
    let dataset = AppDataset::default();
    for spec in ESSENTIAL.iter().chain(SECONDARY).chain(OPTIONAL) {
      assert!(COLLECTIONS.contains(&spec.table), "{} missing", spec.table);
      assert!(dataset.get(spec.table).is_empty());
    }
    assert_eq!(dataset.counts().len(), COLLECTIONS.len());
  }

  #[test]
  fn test_merge_replaces_only_named_collections() {
    let mut dataset = AppDataset::default();
    dataset.set(Table::Trips, vec![Record::new().with("id", 1)]);
    dataset.merge(vec![(Table::Claims, vec![Record::new().with("id", 9)])]);

    assert_eq!(dataset.get(Table::Trips).len(), 1);
    assert_eq!(dataset.get(Table::Claims).len(), 1);
    assert!(dataset.find(Table::Claims, &RecordId::from(9)).is_some());
  }

  #[test]
  fn test_spec_query_order() {
    let trips = ESSENTIAL.iter().find(|s| s.table == Table::Trips).unwrap();
    let order = trips.query().order.unwrap();
    assert_eq!(order.column, "trip_date");
    assert!(!order.ascending);
  }
}
