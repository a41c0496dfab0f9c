//! Serde types for the REST API's error bodies.
//!
//! Rows themselves are passed through as JSON objects; only errors need a
//! typed shape.

use serde::Deserialize;

/// Error body returned by the REST endpoint on a failed request.
#[derive(Debug, Deserialize, Default)]
pub struct ApiError {
  #[serde(default)]
  pub message: Option<String>,
  #[serde(default)]
  pub code: Option<String>,
  #[serde(default)]
  pub details: Option<String>,
  #[serde(default)]
  pub hint: Option<String>,
}

impl ApiError {
  /// Best human-readable message from the body, falling back to the raw text.
  pub fn describe(body: &str, status: u16) -> String {
    match serde_json::from_str::<ApiError>(body) {
      Ok(err) => {
        let mut message = err
          .message
          .unwrap_or_else(|| format!("request failed with status {}", status));
        if let Some(code) = err.code {
          message = format!("{} ({})", message, code);
        }
        if let Some(details) = err.details.filter(|d| !d.is_empty()) {
          message = format!("{}: {}", message, details);
        }
        if let Some(hint) = err.hint.filter(|h| !h.is_empty()) {
          message = format!("{} [hint: {}]", message, hint);
        }
        message
      }
      Err(_) if body.trim().is_empty() => format!("request failed with status {}", status),
      Err(_) => body.trim().to_string(),
    }
  }
}
