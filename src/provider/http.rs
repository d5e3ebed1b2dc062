//! Shared HTTP client and auth utilities.

use std::sync::OnceLock;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

use crate::error::RelayError;

static SHARED_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

/// Get (or create) the shared reqwest client.
pub fn shared_client() -> &'static reqwest::Client {
    SHARED_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .pool_max_idle_per_host(10)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new())
    })
}

/// Build default headers for a Bearer-token API.
pub fn bearer_headers(api_key: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(val) = HeaderValue::from_str(&format!("Bearer {api_key}")) {
        headers.insert(AUTHORIZATION, val);
    }
    headers
}

/// Map a non-success HTTP status to a model error.
pub fn status_to_error(status: u16, body: &str) -> RelayError {
    let detail = extract_error_message(body).unwrap_or_else(|| body.trim().to_string());
    match status {
        401 | 403 => RelayError::Model(format!("authentication failed ({status}): {detail}")),
        429 => RelayError::Model(format!("rate limited (429): {detail}")),
        _ => RelayError::Model(format!("HTTP {status}: {detail}")),
    }
}

fn extract_error_message(body: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()?
        .get("error")?
        .get("message")?
        .as_str()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_errors_prefer_api_message() {
        let err = status_to_error(429, r#"{"error":{"message":"slow down"}}"#);
        assert!(matches!(err, RelayError::Model(msg) if msg == "rate limited (429): slow down"));

        let err = status_to_error(500, "upstream exploded");
        assert!(matches!(err, RelayError::Model(msg) if msg == "HTTP 500: upstream exploded"));
    }

    #[test]
    fn bearer_headers_carry_token() {
        let headers = bearer_headers("sk-test");
        assert_eq!(
            headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()),
            Some("Bearer sk-test")
        );
    }
}
