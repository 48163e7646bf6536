//! HTTP status and transport error translation shared by the adapters.

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Response};
use std::time::Duration;
use tracing::warn;

use crate::errors::{ClientErrorKind, LlmError, Result};

const MAX_ERROR_BODY_CHARS: usize = 512;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) fn build_client(provider: &str, request_timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(request_timeout)
        .connect_timeout(CONNECT_TIMEOUT.min(request_timeout))
        .build()
        .map_err(|e| LlmError::config(format!("{provider}: failed to create HTTP client: {e}")))
}

/// Pass successful responses through; turn everything else into a typed error.
pub(crate) async fn check_status(provider: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = parse_retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    let error = error_from_status(provider, status.as_u16(), retry_after, &body);
    warn!(provider = %provider, status = status.as_u16(), error = %error, "Provider returned error status");
    Err(error)
}

pub(crate) fn error_from_status(
    provider: &str,
    status: u16,
    retry_after: Option<Duration>,
    body: &str,
) -> LlmError {
    let message = truncate(body);
    let client_error = |kind| LlmError::ClientError {
        provider: provider.to_string(),
        kind,
        status: Some(status),
        message: message.clone(),
    };

    match status {
        429 => LlmError::RateLimited {
            provider: provider.to_string(),
            retry_after,
        },
        401 | 403 => client_error(ClientErrorKind::Unauthorized),
        404 => client_error(ClientErrorKind::ModelNotFound),
        408 => LlmError::Timeout {
            provider: provider.to_string(),
            after: Duration::ZERO,
        },
        500..=599 => LlmError::ServerError {
            provider: provider.to_string(),
            status,
            message,
        },
        400..=499 => client_error(ClientErrorKind::BadRequest),
        _ => LlmError::ProviderResponse {
            provider: provider.to_string(),
            reason: format!("unexpected status {status}: {message}"),
        },
    }
}

pub(crate) fn from_reqwest(provider: &str, error: reqwest::Error, timeout: Duration) -> LlmError {
    if error.is_timeout() {
        LlmError::Timeout {
            provider: provider.to_string(),
            after: timeout,
        }
    } else if error.is_decode() {
        LlmError::ProviderResponse {
            provider: provider.to_string(),
            reason: error.to_string(),
        }
    } else {
        LlmError::ProviderUnavailable {
            provider: provider.to_string(),
            reason: error.to_string(),
        }
    }
}

pub(crate) fn malformed(provider: &str, reason: impl Into<String>) -> LlmError {
    LlmError::ProviderResponse {
        provider: provider.to_string(),
        reason: reason.into(),
    }
}

/// `Retry-After` in delta-seconds form; HTTP-date values are ignored.
pub(crate) fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    let seconds: f64 = raw.parse().ok()?;
    Duration::try_from_secs_f64(seconds).ok()
}

pub(crate) fn validate_endpoint(provider: &str, endpoint: &str) -> Result<()> {
    let url = reqwest::Url::parse(endpoint)
        .map_err(|e| LlmError::config(format!("{provider}: invalid endpoint '{endpoint}': {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(LlmError::config(format!(
            "{provider}: unsupported endpoint scheme '{scheme}'"
        ))),
    }
}

fn truncate(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        body.to_string()
    } else {
        let mut short: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        short.push('…');
        short
    }
}
