use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::SyncError;

/// Every backend table the client reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
  Users,
  Trucks,
  Drivers,
  Dispatchers,
  Trips,
  Orders,
  Brokers,
  Tasks,
  LocalDrivers,
  Expenses,
  FixedCosts,
  VariableCosts,
  DriverFiles,
  TruckFiles,
  FuelTransactions,
  MaintenanceRecords,
  Claims,
  Tickets,
  Violations,
  TicketFiles,
  ViolationFiles,
  ClaimFiles,
  ComplianceTasks,
  Accidents,
  CompanyFiles,
  Dealers,
  ChatMessages,
  ActivityLog,
}

impl Table {
  pub const ALL: &'static [Table] = &[
    Table::Users,
    Table::Trucks,
    Table::Drivers,
    Table::Dispatchers,
    Table::Trips,
    Table::Orders,
    Table::Brokers,
    Table::Tasks,
    Table::LocalDrivers,
    Table::Expenses,
    Table::FixedCosts,
    Table::VariableCosts,
    Table::DriverFiles,
    Table::TruckFiles,
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
    Table::Dealers,
    Table::ChatMessages,
    Table::ActivityLog,
  ];

  /// Table name as the remote store knows it.
  pub fn as_str(self) -> &'static str {
    match self {
      Table::Users => "users",
      Table::Trucks => "trucks",
      Table::Drivers => "drivers",
      Table::Dispatchers => "dispatchers",
      Table::Trips => "trips",
      Table::Orders => "orders",
      Table::Brokers => "brokers",
      Table::Tasks => "tasks",
      Table::LocalDrivers => "local_drivers",
      Table::Expenses => "expenses",
      Table::FixedCosts => "fixed_costs",
      Table::VariableCosts => "variable_costs",
      Table::DriverFiles => "driver_files",
      Table::TruckFiles => "truck_files",
      Table::FuelTransactions => "fuel_transactions",
      Table::MaintenanceRecords => "maintenance_records",
      Table::Claims => "claims",
      Table::Tickets => "tickets",
      Table::Violations => "violations",
      Table::TicketFiles => "ticket_files",
      Table::ViolationFiles => "violation_files",
      Table::ClaimFiles => "claim_files",
      Table::ComplianceTasks => "compliance_tasks",
      Table::Accidents => "accidents",
      Table::CompanyFiles => "company_files",
      Table::Dealers => "dealers",
      Table::ChatMessages => "chat_messages",
      Table::ActivityLog => "activity_log",
    }
  }

  /// Human label used in change notifications. Orders are vehicles being
  /// hauled, hence the odd one out.
  pub fn label(self) -> &'static str {
    match self {
      Table::Trips => "Trip",
      Table::Orders => "Vehicle",
      Table::Drivers => "Driver",
      Table::Trucks => "Truck",
      Table::Expenses => "Expense",
      other => other.as_str(),
    }
  }
}

impl fmt::Display for Table {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Table {
  type Err = SyncError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Table::ALL
      .iter()
      .copied()
      .find(|t| t.as_str() == s)
      .ok_or_else(|| SyncError::UnknownTable(s.to_string()))
  }
}

/// Primary key of a row, kept in the textual form used in filters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  /// Build an id from a JSON scalar. Numbers render without quotes.
  pub fn from_value(value: &Value) -> Option<Self> {
    match value {
      Value::String(s) => Some(Self(s.clone())),
      Value::Number(n) => Some(Self(n.to_string())),
      _ => None,
    }
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for RecordId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for RecordId {
  fn from(s: &str) -> Self {
    Self(s.to_string())
  }
}

impl From<String> for RecordId {
  fn from(s: String) -> Self {
    Self(s)
  }
}

impl From<i64> for RecordId {
  fn from(n: i64) -> Self {
    Self(n.to_string())
  }
}

/// A single row. Always a JSON object; anything else is rejected when it
/// crosses the gateway.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
  pub fn new() -> Self {
    Self::default()
  }

  /// Accept a JSON value as a row, or explain why it is not one.
  pub fn from_value(value: Value) -> Result<Self, String> {
    match value {
      Value::Object(map) => Ok(Self(map)),
      other => Err(format!("expected a JSON object, got {}", json_kind(&other))),
    }
  }

  pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
    self.0.insert(field.to_string(), value.into());
    self
  }

  pub fn get(&self, field: &str) -> Option<&Value> {
    self.0.get(field)
  }

  pub fn insert(&mut self, field: &str, value: impl Into<Value>) {
    self.0.insert(field.to_string(), value.into());
  }

  pub fn id(&self) -> Option<RecordId> {
    self.0.get("id").and_then(RecordId::from_value)
  }

  pub fn updated_at(&self) -> Option<&str> {
    self.0.get("updated_at").and_then(Value::as_str)
  }

  pub fn fields(&self) -> &Map<String, Value> {
    &self.0
  }

  pub fn into_value(self) -> Value {
    Value::Object(self.0)
  }
}

impl From<Map<String, Value>> for Record {
  fn from(map: Map<String, Value>) -> Self {
    Self(map)
  }
}

fn json_kind(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "a boolean",
    Value::Number(_) => "a number",
    Value::String(_) => "a string",
    Value::Array(_) => "an array",
    Value::Object(_) => "an object",
  }
}
