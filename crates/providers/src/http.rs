//! Shared HTTP plumbing for the remote providers.

use meshbrain_core::error::ProviderError;
use std::time::Duration;
use tracing::warn;

/// Safety-net request timeout. The router's per-provider deadline is the
/// real bound; this only stops leaked connections from living forever.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(300);

pub(crate) fn build_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(CLIENT_TIMEOUT)
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Falling back to default HTTP client");
            reqwest::Client::new()
        })
}

/// Map a transport failure to a provider error.
pub(crate) fn send_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

/// Turn a non-success response into a provider error, consuming the body.
pub(crate) async fn status_error(provider: &str, response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let retry_after_secs = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();
    classify_status(provider, status, retry_after_secs, body)
}

pub(crate) fn classify_status(
    provider: &str,
    status: u16,
    retry_after_secs: Option<u64>,
    body: String,
) -> ProviderError {
    match status {
        429 => ProviderError::RateLimited {
            retry_after_secs: retry_after_secs.unwrap_or(5),
        },
        401 | 403 => ProviderError::AuthenticationFailed(format!(
            "{provider}: invalid API key or insufficient permissions"
        )),
        408 | 504 => ProviderError::Timeout(format!("{provider}: upstream returned {status}")),
        _ => {
            warn!(provider, status, body = %body, "Provider returned error");
            ProviderError::ApiError {
                status_code: status,
                message: body,
            }
        }
    }
}
