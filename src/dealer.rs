//! Dealer portal: a dealer's own profile, orders and spending.
//!
//! Reads degrade to empty results so the portal stays usable when the
//! backend hiccups. Submitting an order is a real write and reports errors.

use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Mutex;
use tracing::{error, info};

use crate::error::{Result, SyncError};
use crate::gateway::{Actor, Gateway};
use crate::remote::{Query, Record, RecordId, RemoteStore, Table};

const DEALER_ROLE: &str = "DEALER";

/// Vehicle order as entered in the portal form.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DealerOrder {
  pub vehicle_year: Option<i32>,
  pub vehicle_make: Option<String>,
  pub vehicle_model: Option<String>,
  pub vehicle_vin: Option<String>,
  pub vehicle_color: Option<String>,
  pub pickup_location: Option<String>,
  pub delivery_location: Option<String>,
  pub pickup_date: Option<String>,
  pub delivery_date: Option<String>,
  pub notes: Option<String>,
}

/// Inclusive bounds on an order's `created_at`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateRange {
  pub start: Option<DateTime<Utc>>,
  pub end: Option<DateTime<Utc>>,
}

impl DateRange {
  fn contains(&self, order: &Record) -> bool {
    if self.start.is_none() && self.end.is_none() {
      return true;
    }
    let Some(created) = order
      .get("created_at")
      .and_then(Value::as_str)
      .and_then(parse_timestamp)
    else {
      return false;
    };
    self.start.map_or(true, |start| created >= start) && self.end.map_or(true, |end| created <= end)
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Spending {
  pub total_spent: f64,
  pub total_vehicles: usize,
  pub avg_cost_per_vehicle: f64,
  pub pending: usize,
  pub picked_up: usize,
  pub in_transit: usize,
  pub delivered: usize,
  pub orders: Vec<Record>,
}

impl Spending {
  fn summarize(orders: Vec<Record>) -> Self {
    let total_spent: f64 = orders.iter().map(revenue).sum();
    let total_vehicles = orders.len();
    let with_status = |status: &str| {
      orders
        .iter()
        .filter(|o| o.get("delivery_status").and_then(Value::as_str) == Some(status))
        .count()
    };

    Self {
      total_spent,
      total_vehicles,
      avg_cost_per_vehicle: if total_vehicles > 0 {
        total_spent / total_vehicles as f64
      } else {
        0.0
      },
      pending: with_status("pending"),
      picked_up: with_status("picked_up"),
      in_transit: with_status("in_transit"),
      delivered: with_status("delivered"),
      orders,
    }
  }
}

pub struct DealerPortal<S> {
  gateway: Gateway<S>,
  user: Option<Actor>,
  profile: Mutex<Option<Record>>,
}

impl<S: RemoteStore> DealerPortal<S> {
  pub fn new(gateway: Gateway<S>, user: Option<Actor>) -> Self {
    Self {
      gateway,
      user,
      profile: Mutex::new(None),
    }
  }

  /// The signed-in user's dealer row, or `None` for non-dealers and on error.
  pub async fn load_profile(&self) -> Option<Record> {
    let user = self
      .user
      .as_ref()
      .filter(|u| u.role.as_deref() == Some(DEALER_ROLE))?;
    let user_id = user.id.as_deref()?;

    let query = Query::new().filter("user_id", &format!("eq.{}", user_id));
    let profile = match self.gateway.fetch(Table::Dealers, &query).await {
      Ok(rows) => rows.into_iter().next(),
      Err(e) => {
        error!(error = %e, "failed to load dealer profile");
        None
      }
    };
    *self.lock_profile() = profile.clone();
    profile
  }

  /// A dealer's orders, newest first. `status` of `None` or `"all"` means
  /// every delivery status.
  pub async fn load_orders(&self, dealer_id: &RecordId, status: Option<&str>) -> Vec<Record> {
    let mut query = Query::new()
      .filter("dealer_id", &format!("eq.{}", dealer_id))
      .order("created_at.desc");
    if let Some(status) = status.filter(|s| *s != "all") {
      query = query.filter("delivery_status", &format!("eq.{}", status));
    }

    self
      .gateway
      .fetch(Table::Orders, &query)
      .await
      .unwrap_or_else(|e| {
        error!(%dealer_id, error = %e, "failed to load dealer orders");
        Vec::new()
      })
  }

  pub async fn spending(&self, dealer_id: &RecordId, range: DateRange) -> Spending {
    let orders = self
      .load_orders(dealer_id, None)
      .await
      .into_iter()
      .filter(|o| range.contains(o))
      .collect();
    Spending::summarize(orders)
  }

  /// Create an order on behalf of the signed-in dealer and log it.
  pub async fn submit_order(&self, order: &DealerOrder) -> Result<Record> {
    let cached = self.lock_profile().clone();
    let profile = match cached {
      Some(profile) => profile,
      None => self
        .load_profile()
        .await
        .ok_or(SyncError::MissingDealerProfile)?,
    };

    let code = profile
      .get("dealer_code")
      .and_then(Value::as_str)
      .unwrap_or_default();
    let order_number = order_number(code, Utc::now());
    let dealer_id = profile.get("id").cloned().unwrap_or(Value::Null);

    let row = Record::new()
      .with("order_number", order_number.as_str())
      .with("dealer_id", dealer_id.clone())
      .with("vehicle_year", order.vehicle_year)
      .with("vehicle_make", order.vehicle_make.clone())
      .with("vehicle_model", order.vehicle_model.clone())
      .with("vehicle_vin", order.vehicle_vin.clone())
      .with("vehicle_color", order.vehicle_color.clone())
      .with("origin", order.pickup_location.clone())
      .with("destination", order.delivery_location.clone())
      .with("pickup_date", order.pickup_date.clone())
      .with("dropoff_date", order.delivery_date.clone())
      .with("delivery_status", "pending")
      .with("status", "PENDING")
      .with("dispatcher_notes", order.notes.clone().unwrap_or_default());

    let created = self.gateway.insert(Table::Orders, &row).await?;
    info!(%order_number, "dealer order submitted");

    self
      .gateway
      .log_activity(
        "DEALER_ORDER_SUBMITTED",
        self.user.as_ref(),
        json!({
          "dealer_id": dealer_id,
          "dealer_name": profile.get("company_name"),
          "order_id": created.get("id"),
          "order_number": order_number,
        }),
      )
      .await;

    Ok(created)
  }

  fn lock_profile(&self) -> std::sync::MutexGuard<'_, Option<Record>> {
    self
      .profile
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

/// Three letters from the company name plus three random digits, e.g. `ACM417`.
pub fn generate_dealer_code(company_name: &str) -> String {
  let name = if company_name.is_empty() {
    "DLR"
  } else {
    company_name
  };
  let prefix: String = name
    .chars()
    .take(3)
    .flat_map(char::to_uppercase)
    .map(|c| if c.is_ascii_uppercase() { c } else { 'X' })
    .collect();
  let suffix = rand::thread_rng().gen_range(100..1000);
  format!("{}{}", prefix, suffix)
}

/// `DLR-<code>-<last six digits of the millisecond clock>`.
fn order_number(dealer_code: &str, now: DateTime<Utc>) -> String {
  format!(
    "DLR-{}-{:06}",
    dealer_code,
    now.timestamp_millis().rem_euclid(1_000_000)
  )
}

fn revenue(order: &Record) -> f64 {
  match order.get("revenue") {
    Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
    Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
    _ => 0.0,
  }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(raw)
    .map(|t| t.with_timezone(&Utc))
    .ok()
    .or_else(|| {
      NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
    })
}
