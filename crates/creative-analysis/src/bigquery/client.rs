//! Minimal BigQuery REST client: parameterized GoogleSQL through
//! `jobs.query`, polling `jobs.getQueryResults` until the job completes.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::http;
use crate::store::StoreError;

pub const DEFAULT_BIGQUERY_BASE_URL: &str = "https://bigquery.googleapis.com";

/// Server-side wait per request before it answers with `jobComplete: false`.
const SERVER_WAIT_MS: u64 = 10_000;

/// Client-side bound on one HTTP exchange; must exceed the server-side wait.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Result polls before a still-running query is given up on.
const MAX_POLLS: u32 = 30;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryParameter {
    name: String,
    parameter_type: ParameterType,
    parameter_value: ParameterValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct ParameterType {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    array_type: Option<Box<ParameterType>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct ParameterValue {
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    array_values: Option<Vec<ParameterValue>>,
}

impl ParameterType {
    fn scalar(kind: &'static str) -> Self {
        Self {
            kind,
            array_type: None,
        }
    }
}

impl QueryParameter {
    fn scalar(name: &str, kind: &'static str, value: String) -> Self {
        Self {
            name: name.to_string(),
            parameter_type: ParameterType::scalar(kind),
            parameter_value: ParameterValue {
                value: Some(value),
                array_values: None,
            },
        }
    }

    pub fn string(name: &str, value: impl Into<String>) -> Self {
        Self::scalar(name, "STRING", value.into())
    }

    pub fn int64(name: &str, value: i64) -> Self {
        Self::scalar(name, "INT64", value.to_string())
    }

    pub fn float64(name: &str, value: f64) -> Self {
        Self::scalar(name, "FLOAT64", value.to_string())
    }

    pub fn timestamp(name: &str, value: DateTime<Utc>) -> Self {
        Self::scalar(
            name,
            "TIMESTAMP",
            value.format("%Y-%m-%d %H:%M:%S%.6f+00:00").to_string(),
        )
    }

    pub fn string_array(name: &str, values: &[String]) -> Self {
        Self {
            name: name.to_string(),
            parameter_type: ParameterType {
                kind: "ARRAY",
                array_type: Some(Box::new(ParameterType::scalar("STRING"))),
            },
            parameter_value: ParameterValue {
                value: None,
                array_values: Some(
                    values
                        .iter()
                        .map(|v| ParameterValue {
                            value: Some(v.clone()),
                            array_values: None,
                        })
                        .collect(),
                ),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    query: &'a str,
    use_legacy_sql: bool,
    parameter_mode: &'static str,
    query_parameters: &'a [QueryParameter],
    timeout_ms: u64,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    #[serde(default)]
    job_reference: Option<JobReference>,
    #[serde(default)]
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<TableRow>,
    #[serde(default)]
    num_dml_affected_rows: Option<String>,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

#[derive(Debug, Deserialize)]
struct FieldSchema {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    #[serde(default)]
    v: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

/// One result row, keyed by column name. Scalars arrive as strings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: HashMap<String, serde_json::Value>,
}

impl Row {
    /// Value of a STRING (or any scalar) column; `None` for NULL or absent.
    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.values.get(column).and_then(|v| v.as_str())
    }
}

#[cfg(test)]
impl Row {
    /// Builds a row from a JSON object of column values.
    pub(crate) fn from_json(values: serde_json::Value) -> Self {
        Self {
            values: values
                .as_object()
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .collect(),
        }
    }
}

#[derive(Debug, Default)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    /// Set for DML statements.
    pub affected_rows: Option<u64>,
}

impl QueryResponse {
    fn check_errors(&self) -> Result<(), StoreError> {
        match self.errors.first() {
            Some(e) => Err(StoreError::Rejected(format!("{}: {}", e.reason, e.message))),
            None => Ok(()),
        }
    }

    fn into_result(self) -> Result<QueryResult, StoreError> {
        self.check_errors()?;

        let columns: Vec<String> = self
            .schema
            .map(|s| s.fields.into_iter().map(|f| f.name).collect())
            .unwrap_or_default();
        let rows = self
            .rows
            .into_iter()
            .map(|row| Row {
                values: columns
                    .iter()
                    .cloned()
                    .zip(row.f.into_iter().map(|cell| cell.v))
                    .collect(),
            })
            .collect();

        let affected_rows = match self.num_dml_affected_rows {
            Some(n) => Some(n.parse::<u64>().map_err(|_| StoreError::InvalidValue {
                field: "numDmlAffectedRows",
                value: n,
            })?),
            None => None,
        };

        Ok(QueryResult {
            rows,
            affected_rows,
        })
    }
}

pub struct BigQueryClient {
    client: Client,
    base_url: String,
    project_id: String,
    token: Option<SecretString>,
}

impl BigQueryClient {
    pub fn new(project_id: &str, token: Option<SecretString>) -> Result<Self, reqwest::Error> {
        Self::with_base_url(DEFAULT_BIGQUERY_BASE_URL, project_id, token)
    }

    /// Points the client at an alternative endpoint, such as an emulator.
    pub fn with_base_url(
        base_url: &str,
        project_id: &str,
        token: Option<SecretString>,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: http::create_http_client(Some(REQUEST_TIMEOUT))?,
            base_url: base_url.trim_end_matches('/').to_string(),
            project_id: project_id.to_string(),
            token,
        })
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    fn queries_url(&self) -> String {
        format!(
            "{}/bigquery/v2/projects/{}/queries",
            self.base_url, self.project_id
        )
    }

    /// Runs one statement to completion.
    pub async fn query(
        &self,
        sql: &str,
        parameters: &[QueryParameter],
    ) -> Result<QueryResult, StoreError> {
        let request = QueryRequest {
            query: sql,
            use_legacy_sql: false,
            parameter_mode: "NAMED",
            query_parameters: parameters,
            timeout_ms: SERVER_WAIT_MS,
        };
        let mut response: QueryResponse = self
            .send(self.client.post(self.queries_url()).json(&request))
            .await?;

        let mut polls = 0;
        while !response.job_complete {
            response.check_errors()?;
            let job = response.job_reference.as_ref().ok_or_else(|| {
                StoreError::Rejected("incomplete query has no job reference".to_string())
            })?;

            polls += 1;
            if polls > MAX_POLLS {
                return Err(StoreError::Unavailable(format!(
                    "query job {} still running after {} polls",
                    job.job_id, MAX_POLLS
                )));
            }
            debug!(job_id = %job.job_id, polls, "Waiting for query results");

            let mut query = vec![("timeoutMs", SERVER_WAIT_MS.to_string())];
            if let Some(location) = &job.location {
                query.push(("location", location.clone()));
            }
            let url = format!("{}/{}", self.queries_url(), job.job_id);
            response = self.send(self.client.get(url).query(&query)).await?;
        }

        response.into_result()
    }

    async fn send(&self, mut request: reqwest::RequestBuilder) -> Result<QueryResponse, StoreError> {
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(StoreError::Rejected(http::error_summary(response).await));
        }
        response
            .json()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_request_body_shape() {
        let params = vec![
            QueryParameter::string("creative_id", "c-1"),
            QueryParameter::int64("num_shots", 3),
            QueryParameter::string_array("scene_tags", &["gym".to_string()]),
        ];
        let body = serde_json::to_value(QueryRequest {
            query: "SELECT 1",
            use_legacy_sql: false,
            parameter_mode: "NAMED",
            query_parameters: &params,
            timeout_ms: SERVER_WAIT_MS,
        })
        .unwrap();

        assert_eq!(body["useLegacySql"], false);
        assert_eq!(body["parameterMode"], "NAMED");
        assert_eq!(body["timeoutMs"], 10_000);

        let id = &body["queryParameters"][0];
        assert_eq!(id["name"], "creative_id");
        assert_eq!(id["parameterType"]["type"], "STRING");
        assert_eq!(id["parameterValue"]["value"], "c-1");
        assert!(id["parameterType"].get("arrayType").is_none());

        assert_eq!(body["queryParameters"][1]["parameterValue"]["value"], "3");

        let tags = &body["queryParameters"][2];
        assert_eq!(tags["parameterType"]["type"], "ARRAY");
        assert_eq!(tags["parameterType"]["arrayType"]["type"], "STRING");
        assert_eq!(tags["parameterValue"]["arrayValues"][0]["value"], "gym");
        assert!(tags["parameterValue"].get("value").is_none());
    }

    #[test]
    fn test_empty_array_parameter() {
        let body = serde_json::to_value(QueryParameter::string_array("style_tags", &[])).unwrap();
        assert_eq!(body["parameterValue"]["arrayValues"], serde_json::json!([]));
    }

    #[test]
    fn test_timestamp_parameter_format() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
        let body = serde_json::to_value(QueryParameter::timestamp("completed_at", ts)).unwrap();
        assert_eq!(body["parameterType"]["type"], "TIMESTAMP");
        assert_eq!(
            body["parameterValue"]["value"],
            "2024-03-05 14:07:09.000000+00:00"
        );
    }

    #[test]
    fn test_select_response_rows_keyed_by_column() {
        let response: QueryResponse = serde_json::from_str(
            r#"{
                "jobComplete": true,
                "schema": {"fields": [
                    {"name": "creative_id", "type": "STRING"},
                    {"name": "niche", "type": "STRING"}
                ]},
                "rows": [{"f": [{"v": "c-1"}, {"v": null}]}],
                "totalRows": "1"
            }"#,
        )
        .unwrap();

        let result = response.into_result().unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].get_str("creative_id"), Some("c-1"));
        assert_eq!(result.rows[0].get_str("niche"), None);
        assert_eq!(result.affected_rows, None);
    }

    #[test]
    fn test_dml_response_affected_rows() {
        let response: QueryResponse =
            serde_json::from_str(r#"{"jobComplete": true, "numDmlAffectedRows": "0"}"#).unwrap();
        let result = response.into_result().unwrap();
        assert!(result.rows.is_empty());
        assert_eq!(result.affected_rows, Some(0));
    }

    #[test]
    fn test_job_errors_are_rejections() {
        let response: QueryResponse = serde_json::from_str(
            r#"{"jobComplete": true, "errors": [
                {"reason": "invalidQuery", "message": "Unrecognized name: nope"}
            ]}"#,
        )
        .unwrap();
        assert!(matches!(
            response.into_result(),
            Err(StoreError::Rejected(msg)) if msg.contains("invalidQuery")
        ));
    }

    #[test]
    fn test_incomplete_response_carries_job_reference() {
        let response: QueryResponse = serde_json::from_str(
            r#"{"jobComplete": false, "jobReference": {
                "projectId": "p", "jobId": "job_abc", "location": "US"
            }}"#,
        )
        .unwrap();
        assert!(!response.job_complete);
        let job = response.job_reference.unwrap();
        assert_eq!(job.job_id, "job_abc");
        assert_eq!(job.location.as_deref(), Some("US"));
    }

    #[test]
    fn test_queries_url() {
        let client = BigQueryClient::with_base_url("http://localhost:9050/", "my-project", None)
            .unwrap();
        assert_eq!(
            client.queries_url(),
            "http://localhost:9050/bigquery/v2/projects/my-project/queries"
        );
    }
}
