//! Data API client
//!
//! The dashboard server stores every logged value. Requests are JSON over
//! HTTP with a bounded timeout; the client never retries.

use crate::error::{ApiError, Result};
use intent_parser::{MetricDefinition, MetricSource, ParseError};
use reqwest::blocking::{Client, Response};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "http://localhost:5000";
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const METRICS_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Request seam between the dispatcher and the data API.
pub trait DataApi {
    fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Value>;
    fn post(&self, path: &str, body: &Value) -> Result<Value>;
}

/// Blocking HTTP client for the data API.
#[derive(Clone)]
pub struct HttpDataApi {
    base_url: String,
    client: Client,
    metrics_client: Client,
}

impl HttpDataApi {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeouts(base_url, REQUEST_TIMEOUT, METRICS_FETCH_TIMEOUT)
    }

    pub fn with_timeouts(base_url: &str, request: Duration, metrics_fetch: Duration) -> Result<Self> {
        let build = |timeout| {
            Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| ApiError::Unreachable(format!("http client: {e}")))
        };
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: build(request)?,
            metrics_client: build(metrics_fetch)?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Turn a response into JSON, surfacing the server's own error text on
/// non-success statuses.
fn read_json(resp: Response) -> Result<Value> {
    let status = resp.status();
    let body = resp.text()?;
    let parsed = serde_json::from_str::<Value>(&body);
    if !status.is_success() {
        let message = parsed
            .ok()
            .and_then(|v| {
                ["message", "error"]
                    .iter()
                    .find_map(|k| v.get(*k).and_then(Value::as_str).map(str::to_string))
            })
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown error").to_string());
        return Err(ApiError::Http {
            status: status.as_u16(),
            message,
        });
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    parsed.map_err(|e| ApiError::Decode(e.to_string()))
}

impl DataApi for HttpDataApi {
    fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        let url = self.url(path);
        debug!(%url, ?query, "GET");
        read_json(self.client.get(&url).query(query).send()?)
    }

    fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let url = self.url(path);
        debug!(%url, %body, "POST");
        read_json(self.client.post(&url).json(body).send()?)
    }
}

/// Metric definitions arrive either bare or wrapped as `{"metrics": [...]}`.
pub fn metric_definitions(body: Value) -> Result<Vec<MetricDefinition>> {
    let list = match body {
        Value::Object(mut map) => map.remove("metrics").unwrap_or(Value::Array(Vec::new())),
        other => other,
    };
    serde_json::from_value(list).map_err(|e| ApiError::Decode(format!("custom metrics: {e}")))
}

impl MetricSource for HttpDataApi {
    fn fetch_metrics(&self) -> intent_parser::Result<Vec<MetricDefinition>> {
        let url = self.url("/api/custom-metrics");
        debug!(%url, "Fetching custom metrics");
        let fetched = self
            .metrics_client
            .get(&url)
            .send()
            .map_err(ApiError::from)
            .and_then(read_json)
            .and_then(metric_definitions);
        fetched.map_err(|e| ParseError::Source(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metric_definitions_shapes() {
        let wrapped = json!({"metrics": [
            {"id": 3, "name": "Medication", "keyword": "medication", "unit": "pills"},
            {"id": 4, "name": "Water"}
        ]});
        let metrics = metric_definitions(wrapped).unwrap();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[1].voice_keyword(), "water");

        let bare = json!([{"id": 7, "name": "Pushups"}]);
        assert_eq!(metric_definitions(bare).unwrap()[0].id, 7);

        assert!(metric_definitions(json!({})).unwrap().is_empty());
        assert!(matches!(
            metric_definitions(json!({"metrics": "nope"})),
            Err(ApiError::Decode(_))
        ));
    }

    #[test]
    fn test_unreachable_server_is_connectivity_error() {
        // Port 9 (discard) is closed on test hosts; the request must fail fast.
        let api = HttpDataApi::with_timeouts(
            "http://127.0.0.1:9/",
            Duration::from_secs(2),
            Duration::from_secs(2),
        )
        .unwrap();
        assert_eq!(api.base_url(), "http://127.0.0.1:9");
        let err = api.post("/api/sleep", &json!({"hours": 7.5})).unwrap_err();
        assert!(err.is_connectivity(), "{err:?}");
        assert!(matches!(api.fetch_metrics(), Err(ParseError::Source(_))));
    }
}
