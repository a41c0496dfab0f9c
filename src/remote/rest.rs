use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use std::time::Duration;
use url::Url;

use super::api_types::ApiError;
use super::filter::Query;
use super::types::{Record, RecordId, Table};
use super::RemoteStore;
use crate::config::{BackendConfig, Credentials};
use crate::error::{Result, SyncError, WriteOp};

/// Ask the REST endpoint for a single object instead of an array.
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

/// Remote store speaking the backend's REST dialect over HTTP.
#[derive(Clone)]
pub struct RestStore {
  client: Client,
  rest_url: Url,
}

impl RestStore {
  pub fn new(backend: &BackendConfig, credentials: &Credentials) -> Result<Self> {
    let base = Url::parse(&backend.url)
      .map_err(|e| SyncError::Config(format!("invalid backend url {}: {}", backend.url, e)))?;
    let rest_url = base
      .join("rest/v1/")
      .map_err(|e| SyncError::Config(format!("invalid backend url {}: {}", backend.url, e)))?;

    let mut headers = HeaderMap::new();
    headers.insert("apikey", header_value(&credentials.anon_key)?);
    headers.insert(
      AUTHORIZATION,
      header_value(&format!("Bearer {}", credentials.bearer()))?,
    );

    let client = Client::builder()
      .default_headers(headers)
      .timeout(Duration::from_secs(backend.request_timeout_secs))
      .build()
      .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {}", e)))?;

    Ok(Self { client, rest_url })
  }

  fn table_url(&self, table: Table) -> Result<Url> {
    self
      .rest_url
      .join(table.as_str())
      .map_err(|e| SyncError::Config(format!("invalid table url for {}: {}", table, e)))
  }

  /// Send a request and return the decoded body, or the remote error message.
  async fn send(request: RequestBuilder) -> std::result::Result<Option<Value>, String> {
    let response = request.send().await.map_err(|e| e.to_string())?;
    let status = response.status();
    let body = response.text().await.map_err(|e| e.to_string())?;

    if !status.is_success() {
      return Err(ApiError::describe(&body, status.as_u16()));
    }
    if status == StatusCode::NO_CONTENT || body.trim().is_empty() {
      return Ok(None);
    }
    serde_json::from_str(&body)
      .map(Some)
      .map_err(|e| format!("invalid JSON in response: {}", e))
  }

  async fn write_one(
    &self,
    table: Table,
    op: WriteOp,
    request: RequestBuilder,
  ) -> Result<Record> {
    let request = request
      .header("Prefer", "return=representation")
      .header(ACCEPT, SINGLE_OBJECT);

    let body = Self::send(request)
      .await
      .map_err(|message| SyncError::write(table.as_str(), op, message))?
      .ok_or_else(|| SyncError::write(table.as_str(), op, "no row returned"))?;

    Record::from_value(body).map_err(|message| SyncError::Decode {
      table: table.to_string(),
      message,
    })
  }
}

#[async_trait]
impl RemoteStore for RestStore {
  async fn fetch(&self, table: Table, query: &Query) -> Result<Vec<Record>> {
    let url = self.table_url(table)?;
    let request = self.client.get(url).query(&query.to_params());

    let body = Self::send(request)
      .await
      .map_err(|message| SyncError::fetch(table.as_str(), message))?;

    into_rows(table, body)
  }

  async fn insert(&self, table: Table, record: &Record) -> Result<Record> {
    let url = self.table_url(table)?;
    let request = self.client.post(url).json(record);
    self.write_one(table, WriteOp::Insert, request).await
  }

  async fn update(&self, table: Table, id: &RecordId, record: &Record) -> Result<Record> {
    let url = self.table_url(table)?;
    let request = self
      .client
      .patch(url)
      .query(&[("id", format!("eq.{}", id))])
      .json(record);
    self.write_one(table, WriteOp::Update, request).await
  }

  async fn delete(&self, table: Table, id: &RecordId) -> Result<()> {
    let url = self.table_url(table)?;
    let request = self
      .client
      .delete(url)
      .query(&[("id", format!("eq.{}", id))]);

    Self::send(request)
      .await
      .map_err(|message| SyncError::write(table.as_str(), WriteOp::Delete, message))?;
    Ok(())
  }
}

/// Turn a fetch response body into rows. No body or `null` is an empty
/// result; a lone object is a single row.
fn into_rows(table: Table, body: Option<Value>) -> Result<Vec<Record>> {
  let rows = match body {
    None | Some(Value::Null) => return Ok(Vec::new()),
    Some(Value::Array(rows)) => rows,
    Some(other) => vec![other],
  };

  rows
    .into_iter()
    .map(|row| {
      Record::from_value(row).map_err(|message| SyncError::Decode {
        table: table.to_string(),
        message,
      })
    })
    .collect()
}

fn header_value(value: &str) -> Result<HeaderValue> {
  HeaderValue::from_str(value)
    .map_err(|e| SyncError::Config(format!("credential is not a valid header value: {}", e)))
}
