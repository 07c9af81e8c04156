//! Shared JSON-over-HTTP call with retry for the hosted model APIs.
//!
//! Retry strategy (only when `max_retries > 0`):
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;

use crate::error::{Error, Result};

/// Send the request produced by `build`, retrying transient failures, and
/// decode the response body as JSON. `service` names the API in errors.
pub async fn post_json<F>(service: &str, max_retries: u32, build: F) -> Result<serde_json::Value>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(service, attempt, delay_secs = delay.as_secs(), "retrying");
            tokio::time::sleep(delay).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json::<serde_json::Value>()
                        .await
                        .map_err(|e| Error::remote(service, format!("invalid JSON body: {}", e)));
                }

                let body_text = response.text().await.unwrap_or_default();
                let err = Error::remote(service, format!("HTTP {}: {}", status, truncate(&body_text)));

                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(err);
                    continue;
                }
                return Err(err);
            }
            Err(e) => {
                last_err = Some(Error::remote(service, e.to_string()));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| Error::remote(service, "request failed after retries")))
}

/// Read a required API key from the environment.
pub fn api_key(var: &str) -> Result<String> {
    std::env::var(var)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| Error::Config(format!("{} environment variable not set", var)))
}

pub fn client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))
}

fn truncate(body: &str) -> &str {
    const MAX: usize = 500;
    if body.len() <= MAX {
        return body;
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "é".repeat(400);
        let t = truncate(&s);
        assert!(t.len() <= 500);
        assert!(s.starts_with(t));
    }

    #[tokio::test]
    async fn unreachable_host_is_a_remote_error() {
        let client = client(2).unwrap();
        let err = post_json("test api", 0, || client.post("http://127.0.0.1:1/nothing"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RemoteService { .. }));
        assert!(err.to_string().starts_with("test api request failed"));
    }

    #[test]
    fn missing_api_key_is_config_error() {
        let err = api_key("TESTGEN_DEFINITELY_UNSET_KEY").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
