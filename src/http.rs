//! JSON-over-HTTP helper shared by the embedding and language-model clients.
//!
//! Retry strategy:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;

use tracing::warn;

use crate::error::{DocChatError, Result};

pub(crate) fn client(timeout_secs: u64, provider: &str) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| DocChatError::provider(provider, e))
}

/// Send the request produced by `build` until it succeeds or retries run out,
/// returning the parsed JSON body.
pub(crate) async fn post_json_with_retry<F>(
    provider: &str,
    max_retries: u32,
    build: F,
) -> Result<serde_json::Value>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json::<serde_json::Value>()
                        .await
                        .map_err(|e| DocChatError::provider(provider, format!("invalid JSON: {}", e)));
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    warn!(provider, attempt, %status, "retryable API error");
                    last_err = Some(format!("API error {}: {}", status, body_text));
                    continue;
                }

                return Err(DocChatError::provider(
                    provider,
                    format!("API error {}: {}", status, body_text),
                ));
            }
            Err(e) => {
                warn!(provider, attempt, error = %e, "request failed");
                last_err = Some(format!("request failed: {}", e));
            }
        }
    }

    Err(DocChatError::provider(
        provider,
        last_err.unwrap_or_else(|| "failed after retries".to_string()),
    ))
}
