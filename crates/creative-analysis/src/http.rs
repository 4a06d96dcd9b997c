//! Shared HTTP client construction for remote adapters.

use std::time::Duration;

use reqwest::{Client, Response};

use crate::sanitize;

/// Default connect timeout for HTTP requests (10 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum length of a remote error body carried into errors and logs.
pub const MAX_ERROR_BODY_LENGTH: usize = 200;

/// Creates an HTTP client with a connect timeout and an optional overall
/// request timeout.
pub fn create_http_client(request_timeout: Option<Duration>) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
        .user_agent(concat!("creative-analysis/", env!("CARGO_PKG_VERSION")));
    if let Some(timeout) = request_timeout {
        builder = builder.timeout(timeout);
    }
    builder.build()
}

/// Creates a client for streaming downloads: no overall deadline, but a
/// stalled body read fails after `read_timeout`.
pub fn create_download_client(read_timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
        .read_timeout(read_timeout)
        .user_agent(concat!("creative-analysis/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Formats a non-success response as `"<status>: <truncated body>"`.
pub async fn error_summary(response: Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    format!(
        "{}: {}",
        status,
        sanitize::truncate_body(body.trim(), MAX_ERROR_BODY_LENGTH)
    )
}
