//! Error taxonomy for the provider runtime.
//!
//! Adapters translate vendor failures into [`LlmError`] at their boundary, so
//! everything above the provider contract works with a closed set of kinds
//! (see [`ErrorKind`]) instead of inspecting messages.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LlmError>;

/// Which routing slot a provider occupies on the switcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteRole {
    Active,
    Fallback,
}

impl fmt::Display for RouteRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteRole::Active => write!(f, "active"),
            RouteRole::Fallback => write!(f, "fallback"),
        }
    }
}

/// Client-side rejections; never worth retrying against the same provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientErrorKind {
    BadRequest,
    Unauthorized,
    ModelNotFound,
}

/// Closed classification of every [`LlmError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ProviderConfig,
    RuntimeConfig,
    ProviderNotFound,
    ActiveProviderDeletion,
    ProviderUnhealthy,
    ProviderUnavailable,
    ServerError,
    RateLimited,
    Timeout,
    ProviderResponse,
    Client,
    Cancelled,
    NoActiveProvider,
    AllProvidersFailed,
    Store,
    Credential,
}

#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("Invalid provider configuration: {reason}")]
    ProviderConfig { reason: String },

    #[error("Invalid runtime configuration: {reason}")]
    RuntimeConfig { reason: String },

    #[error("Provider not found: {id}")]
    ProviderNotFound { id: String },

    #[error("Provider {id} is the {role} provider and cannot be deleted")]
    ActiveProviderDeletion { id: String, role: RouteRole },

    #[error("Provider {id} is currently marked unhealthy")]
    ProviderUnhealthy { id: String },

    #[error("Provider unavailable: {provider} - {reason}")]
    ProviderUnavailable { provider: String, reason: String },

    #[error("Provider server error: {provider} - {status}: {message}")]
    ServerError {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Rate limit exceeded: {provider}{}", describe_retry_after(.retry_after))]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Provider timeout: {provider} - no response within {after:?}")]
    Timeout { provider: String, after: Duration },

    #[error("Unexpected response from {provider}: {reason}")]
    ProviderResponse { provider: String, reason: String },

    #[error("Request rejected by {provider} ({kind:?}): {message}")]
    ClientError {
        provider: String,
        kind: ClientErrorKind,
        status: Option<u16>,
        message: String,
    },

    #[error("Request cancelled by caller")]
    Cancelled,

    #[error("No active provider configured")]
    NoActiveProvider,

    #[error("All providers failed: primary: {primary}; fallback: {}", describe_fallback(.fallback))]
    AllProvidersFailed {
        primary: Box<LlmError>,
        fallback: Option<Box<LlmError>>,
    },

    #[error("Configuration store error: {reason}")]
    Store { reason: String },

    #[error("Credential service error: {reason}")]
    Credential { reason: String },
}

fn describe_retry_after(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(delay) => format!(" - retry after {}s", delay.as_secs_f64()),
        None => String::new(),
    }
}

fn describe_fallback(fallback: &Option<Box<LlmError>>) -> String {
    match fallback {
        Some(error) => error.to_string(),
        None => "not configured".to_string(),
    }
}

impl LlmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LlmError::ProviderConfig { .. } => ErrorKind::ProviderConfig,
            LlmError::RuntimeConfig { .. } => ErrorKind::RuntimeConfig,
            LlmError::ProviderNotFound { .. } => ErrorKind::ProviderNotFound,
            LlmError::ActiveProviderDeletion { .. } => ErrorKind::ActiveProviderDeletion,
            LlmError::ProviderUnhealthy { .. } => ErrorKind::ProviderUnhealthy,
            LlmError::ProviderUnavailable { .. } => ErrorKind::ProviderUnavailable,
            LlmError::ServerError { .. } => ErrorKind::ServerError,
            LlmError::RateLimited { .. } => ErrorKind::RateLimited,
            LlmError::Timeout { .. } => ErrorKind::Timeout,
            LlmError::ProviderResponse { .. } => ErrorKind::ProviderResponse,
            LlmError::ClientError { .. } => ErrorKind::Client,
            LlmError::Cancelled => ErrorKind::Cancelled,
            LlmError::NoActiveProvider => ErrorKind::NoActiveProvider,
            LlmError::AllProvidersFailed { .. } => ErrorKind::AllProvidersFailed,
            LlmError::Store { .. } => ErrorKind::Store,
            LlmError::Credential { .. } => ErrorKind::Credential,
        }
    }

    /// Wait requested by the provider, only meaningful for rate limits.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        LlmError::ProviderConfig {
            reason: reason.into(),
        }
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        LlmError::ProviderNotFound { id: id.into() }
    }
}
