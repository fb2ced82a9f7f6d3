//! Prometheus `query_range` client.
//!
//! Issues `GET {base}/api/v1/query_range` and decodes the `matrix` result.
//! Each result becomes one [`Series`] named after a configurable metric label
//! (by default `friendly_name`), falling back to `__name__` and finally to
//! the query text itself.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::DateTime;
use log::debug;
use serde::Deserialize;
use snafu::prelude::*;

use super::{
    ApiSnafu, DecodeSnafu, HttpSnafu, InvalidSampleSnafu, RangeSource, SourceError,
    UnexpectedResultTypeSnafu,
};
use crate::{
    series::{Sample, Series},
    window::QueryWindow,
};

/// Label used to name result columns unless configured otherwise.
pub const DEFAULT_LABEL: &str = "friendly_name";

const METRIC_NAME_LABEL: &str = "__name__";
const MAX_ERROR_BODY: usize = 512;

/// HTTP client for a Prometheus-compatible range query endpoint.
#[derive(Debug, Clone)]
pub struct PrometheusSource {
    client: reqwest::Client,
    base_url: String,
    label: String,
}

impl PrometheusSource {
    /// Client for `base_url` using a default `reqwest::Client`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Client for `base_url` using a caller-configured `reqwest::Client`.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        PrometheusSource {
            client,
            base_url: base_url.into(),
            label: DEFAULT_LABEL.to_string(),
        }
    }

    /// Name result columns after `label` instead of [`DEFAULT_LABEL`].
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Label used for column names.
    pub fn label(&self) -> &str {
        &self.label
    }

    fn endpoint(&self) -> String {
        format!("{}/api/v1/query_range", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl RangeSource for PrometheusSource {
    async fn query_range(
        &self,
        query: &str,
        window: &QueryWindow,
    ) -> Result<Vec<Series>, SourceError> {
        let url = self.endpoint();
        debug!("GET {url} query={query:?} window={window}");

        let params = [
            ("query", query.to_string()),
            ("start", window.start().timestamp().to_string()),
            ("end", window.end().timestamp().to_string()),
            ("step", window.step().as_query_param()),
        ];

        let response = self
            .client
            .get(&url)
            .query(&params)
            .send()
            .await
            .context(HttpSnafu { url: url.as_str() })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context(HttpSnafu { url: url.as_str() })?;

        // 400 and 422 carry a rejected query; other failures keep their status.
        if !status.is_success() {
            let rejected = matches!(status.as_u16(), 400 | 422);
            if let (true, Ok(QueryResponse {
                error_type: Some(error_type),
                error: Some(error),
                ..
            })) = (rejected, serde_json::from_str::<QueryResponse>(&body))
            {
                return ApiSnafu { error_type, error }.fail();
            }
            return Err(SourceError::Status {
                url,
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY).collect(),
            });
        }

        decode_matrix(&body, &self.label, query)
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default, rename = "errorType")]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(rename = "resultType")]
    result_type: String,
    #[serde(default)]
    result: Vec<MatrixResult>,
}

#[derive(Debug, Deserialize)]
struct MatrixResult {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    #[serde(default)]
    values: Vec<(f64, String)>,
}

/// Decode a `query_range` response body, keeping the store's sample order.
pub(crate) fn decode_matrix(
    body: &str,
    label: &str,
    query: &str,
) -> Result<Vec<Series>, SourceError> {
    let response: QueryResponse = serde_json::from_str(body).context(DecodeSnafu)?;

    if response.status != "success" {
        return ApiSnafu {
            error_type: response.error_type.unwrap_or_else(|| response.status.clone()),
            error: response.error.unwrap_or_default(),
        }
        .fail();
    }

    let Some(data) = response.data else {
        return Ok(Vec::new());
    };
    ensure!(
        data.result_type == "matrix",
        UnexpectedResultTypeSnafu {
            result_type: data.result_type
        }
    );

    data.result
        .into_iter()
        .map(|result| {
            let name = result
                .metric
                .get(label)
                .or_else(|| result.metric.get(METRIC_NAME_LABEL))
                .cloned()
                .unwrap_or_else(|| query.to_string());

            let samples = result
                .values
                .into_iter()
                .map(|(ts, raw)| decode_sample(&name, ts, &raw))
                .collect::<Result<Vec<_>, _>>()?;

            Ok(Series::new(name, samples).with_key(label_set(&result.metric)))
        })
        .collect()
}

/// `{k1="v1",k2="v2"}` in label order.
fn label_set(metric: &BTreeMap<String, String>) -> String {
    let pairs: Vec<String> = metric.iter().map(|(k, v)| format!("{k}={v:?}")).collect();
    format!("{{{}}}", pairs.join(","))
}

fn decode_sample(series: &str, ts: f64, raw: &str) -> Result<Sample, SourceError> {
    let invalid = || InvalidSampleSnafu {
        series,
        raw: format!("[{ts}, {raw:?}]"),
    };

    ensure!(ts.is_finite(), invalid());
    let timestamp = DateTime::from_timestamp(ts.round() as i64, 0).context(invalid())?;
    // "NaN", "+Inf" and "-Inf" parse and are normalized to missing by Sample::new.
    let value: f64 = raw.parse().ok().context(invalid())?;

    Ok(Sample::new(timestamp, value))
}
