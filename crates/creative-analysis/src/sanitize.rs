//! Helpers for sanitizing data before it enters tracing span attributes or
//! the local filesystem.
//!
//! Storage locators and endpoint URLs can carry signed-query tokens or
//! userinfo credentials; these functions keep them out of logs.

use std::path::Path;

const MAX_COMPONENT_LEN: usize = 64;

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Strips userinfo and query strings from a URI.
///
/// - `https://user:pw@host/v1/x?sig=abc` → `https://****@host/v1/x`
/// - `gs://bucket/path/video.mp4?X-Goog-Signature=..` → `gs://bucket/path/video.mp4`
/// - `gs://bucket/path/video.mp4` → unchanged
pub fn redact_uri(uri: &str) -> String {
    let without_query = uri.split(['?', '#']).next().unwrap_or(uri);

    if let Some(scheme_end) = without_query.find("://") {
        let after_scheme = &without_query[scheme_end + 3..];
        let authority_end = after_scheme.find('/').unwrap_or(after_scheme.len());
        if let Some(at_pos) = after_scheme[..authority_end].find('@') {
            let scheme = &without_query[..scheme_end + 3];
            let after_at = &after_scheme[at_pos + 1..];
            return format!("{}****@{}", scheme, after_at);
        }
    }

    without_query.to_string()
}

/// Turns an opaque identifier into a safe single path component.
///
/// Anything outside `[A-Za-z0-9_-]` becomes `_`, the result is capped at 64
/// characters, and an identifier that sanitizes to nothing becomes `creative`.
pub fn path_component(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_COMPONENT_LEN)
        .collect();

    if cleaned.trim_matches('_').is_empty() {
        "creative".to_string()
    } else {
        cleaned
    }
}

/// Truncates a remote error body so responses cannot flood the logs.
pub fn truncate_body(body: &str, max_len: usize) -> String {
    if body.len() <= max_len {
        return body.to_string();
    }
    let mut end = max_len;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated)", &body[..end])
}
