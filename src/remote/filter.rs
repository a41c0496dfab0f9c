//! Filter expressions and sort orders in the remote store's `op.value` syntax.
//!
//! A filter string such as `eq.5`, `ilike.%smith%` or `in.(1,2,3)` is parsed
//! into a [`Filter`], which can be rendered back into a query parameter or
//! evaluated against a JSON value.

use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
  Eq(String),
  Neq(String),
  Gt(String),
  Gte(String),
  Lt(String),
  Lte(String),
  Like(String),
  ILike(String),
  In(Vec<String>),
}

impl Filter {
  /// Parse an `op.value` expression.
  ///
  /// Input without a recognized operator prefix is treated as an exact match
  /// on the whole string, so `"foo"` means `eq.foo`.
  pub fn parse(expr: &str) -> Filter {
    // Longer prefixes first: `gte.` must not be read as `gt.` + "e...".
    if let Some(rest) = expr.strip_prefix("in.(") {
      let inner = rest.strip_suffix(')').unwrap_or(rest);
      let values = inner.split(',').map(|v| v.trim().to_string()).collect();
      return Filter::In(values);
    }

    let prefixes: [(&str, fn(String) -> Filter); 8] = [
      ("eq.", Filter::Eq),
      ("neq.", Filter::Neq),
      ("gte.", Filter::Gte),
      ("gt.", Filter::Gt),
      ("lte.", Filter::Lte),
      ("lt.", Filter::Lt),
      ("ilike.", Filter::ILike),
      ("like.", Filter::Like),
    ];

    for (prefix, build) in prefixes {
      if let Some(value) = expr.strip_prefix(prefix) {
        return build(value.to_string());
      }
    }

    Filter::Eq(expr.to_string())
  }

  /// Render as a query parameter value, e.g. `gte.2024-01-01`.
  pub fn to_param(&self) -> String {
    match self {
      Filter::Eq(v) => format!("eq.{}", v),
      Filter::Neq(v) => format!("neq.{}", v),
      Filter::Gt(v) => format!("gt.{}", v),
      Filter::Gte(v) => format!("gte.{}", v),
      Filter::Lt(v) => format!("lt.{}", v),
      Filter::Lte(v) => format!("lte.{}", v),
      Filter::Like(v) => format!("like.{}", v),
      Filter::ILike(v) => format!("ilike.{}", v),
      Filter::In(values) => format!("in.({})", values.join(",")),
    }
  }

  /// Evaluate the predicate against a column value.
  ///
  /// Numbers compare numerically when the operand parses as one; everything
  /// else compares as text. A missing or null column only satisfies `neq`.
  pub fn matches(&self, value: Option<&Value>) -> bool {
    let value = match value {
      None | Some(Value::Null) => return matches!(self, Filter::Neq(_)),
      Some(v) => v,
    };

    match self {
      Filter::Eq(op) => compare(value, op) == Some(Ordering::Equal),
      Filter::Neq(op) => compare(value, op) != Some(Ordering::Equal),
      Filter::Gt(op) => compare(value, op) == Some(Ordering::Greater),
      Filter::Gte(op) => matches!(
        compare(value, op),
        Some(Ordering::Greater | Ordering::Equal)
      ),
      Filter::Lt(op) => compare(value, op) == Some(Ordering::Less),
      Filter::Lte(op) => matches!(compare(value, op), Some(Ordering::Less | Ordering::Equal)),
      Filter::Like(pattern) => like(&as_text(value), pattern),
      Filter::ILike(pattern) => like(&as_text(value).to_lowercase(), &pattern.to_lowercase()),
      Filter::In(values) => values
        .iter()
        .any(|op| compare(value, op) == Some(Ordering::Equal)),
    }
  }
}

fn as_text(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

fn compare(value: &Value, operand: &str) -> Option<Ordering> {
  match value {
    Value::Number(n) => {
      let lhs = n.as_f64()?;
      match operand.parse::<f64>() {
        Ok(rhs) => lhs.partial_cmp(&rhs),
        Err(_) => Some(n.to_string().as_str().cmp(operand)),
      }
    }
    Value::Bool(b) => Some(b.to_string().as_str().cmp(operand)),
    other => Some(as_text(other).as_str().cmp(operand)),
  }
}

/// SQL `LIKE`: `%` matches any run, `_` matches one character.
fn like(text: &str, pattern: &str) -> bool {
  let text: Vec<char> = text.chars().collect();
  let pattern: Vec<char> = pattern.chars().collect();
  like_at(&text, &pattern)
}

fn like_at(text: &[char], pattern: &[char]) -> bool {
  match pattern.split_first() {
    None => text.is_empty(),
    Some(('%', rest)) => (0..=text.len()).any(|i| like_at(&text[i..], rest)),
    Some(('_', rest)) => !text.is_empty() && like_at(&text[1..], rest),
    Some((c, rest)) => text.first() == Some(c) && like_at(&text[1..], rest),
  }
}

/// Sort order, written `field`, `field.asc` or `field.desc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
  pub column: String,
  pub ascending: bool,
}

impl Order {
  pub fn parse(spec: &str) -> Order {
    match spec.split_once('.') {
      Some((column, direction)) => Order {
        column: column.to_string(),
        ascending: direction != "desc",
      },
      None => Order {
        column: spec.to_string(),
        ascending: true,
      },
    }
  }

  pub fn to_param(&self) -> String {
    let direction = if self.ascending { "asc" } else { "desc" };
    format!("{}.{}", self.column, direction)
  }
}

/// Options for a table fetch: projected columns, filters and sort order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
  pub select: Option<String>,
  pub filters: Vec<(String, Filter)>,
  pub order: Option<Order>,
}

impl Query {
  pub fn new() -> Self {
    Self::default()
  }

  /// Build from loosely typed options: a field → filter-expression map and an
  /// order spec.
  pub fn parse(
    select: Option<&str>,
    filters: &BTreeMap<String, String>,
    order: Option<&str>,
  ) -> Self {
    Self {
      select: select.map(String::from),
      filters: filters
        .iter()
        .map(|(field, expr)| (field.clone(), Filter::parse(expr)))
        .collect(),
      order: order.map(Order::parse),
    }
  }

  pub fn select(mut self, columns: &str) -> Self {
    self.select = Some(columns.to_string());
    self
  }

  pub fn filter(mut self, field: &str, expr: &str) -> Self {
    self.filters.push((field.to_string(), Filter::parse(expr)));
    self
  }

  pub fn order(mut self, spec: &str) -> Self {
    self.order = Some(Order::parse(spec));
    self
  }

  /// Query parameters in the remote store's REST syntax.
  pub fn to_params(&self) -> Vec<(String, String)> {
    let mut params = vec![(
      "select".to_string(),
      self.select.clone().unwrap_or_else(|| "*".to_string()),
    )];
    for (field, filter) in &self.filters {
      params.push((field.clone(), filter.to_param()));
    }
    if let Some(order) = &self.order {
      params.push(("order".to_string(), order.to_param()));
    }
    params
  }
}

/// Split a CLI-style `field=op.value` argument.
pub fn parse_filter_arg(arg: &str) -> Result<(String, String)> {
  match arg.split_once('=') {
    Some((field, expr)) if !field.is_empty() => Ok((field.to_string(), expr.to_string())),
    _ => Err(SyncError::InvalidQuery(format!(
      "expected field=op.value, got '{}'",
      arg
    ))),
  }
}
