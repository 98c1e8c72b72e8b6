//! Structural validation of target configuration.
//!
//! Targets are checked once, when they are created or replaced. The scheduler
//! trusts whatever reaches it, so anything malformed has to be rejected here.

use reqwest::Method;
use reqwest::header::{HeaderName, HeaderValue};
use thiserror::Error;
use url::Url;

use crate::target::TargetSpec;

/// Longest accepted interval between cycles: one day
pub const MAX_INTERVAL_S: u64 = 86_400;

/// Longest accepted initial backoff: one hour
pub const MAX_BACKOFF_S: f64 = 3_600.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("name must not be empty")]
    EmptyName,

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("URL has no host")]
    MissingHost,

    #[error("invalid HTTP method: {0:?}")]
    InvalidMethod(String),

    #[error("expected_statuses must contain at least one status code")]
    NoExpectedStatuses,

    #[error("invalid HTTP status code: {0}")]
    InvalidStatus(u16),

    #[error("timeout_ms must be greater than zero")]
    ZeroTimeout,

    #[error("interval_s must be greater than zero")]
    ZeroInterval,

    #[error("interval_s must be at most {max}, got {0}", max = MAX_INTERVAL_S)]
    IntervalTooLong(u64),

    #[error("backoff_s must be a positive number, got {0}")]
    InvalidBackoff(f64),

    #[error("backoff_s must be at most {max}, got {0}", max = MAX_BACKOFF_S)]
    BackoffTooLong(f64),

    #[error("invalid header {0:?}")]
    InvalidHeader(String),
}

/// Validate a target spec before it enters the registry
pub fn validate_spec(spec: &TargetSpec) -> Result<(), ValidationError> {
    if spec.name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }

    validate_url(&spec.url)?;

    if spec.method.is_empty() || Method::from_bytes(spec.method.as_bytes()).is_err() {
        return Err(ValidationError::InvalidMethod(spec.method.clone()));
    }

    if spec.expected_statuses.is_empty() {
        return Err(ValidationError::NoExpectedStatuses);
    }
    if let Some(status) = spec.expected_statuses.iter().find(|s| !(100..=599).contains(*s)) {
        return Err(ValidationError::InvalidStatus(*status));
    }

    if spec.timeout_ms == 0 {
        return Err(ValidationError::ZeroTimeout);
    }
    if spec.interval_s == 0 {
        return Err(ValidationError::ZeroInterval);
    }
    if spec.interval_s > MAX_INTERVAL_S {
        return Err(ValidationError::IntervalTooLong(spec.interval_s));
    }
    if !spec.backoff_s.is_finite() || spec.backoff_s <= 0.0 {
        return Err(ValidationError::InvalidBackoff(spec.backoff_s));
    }
    if spec.backoff_s > MAX_BACKOFF_S {
        return Err(ValidationError::BackoffTooLong(spec.backoff_s));
    }

    if let Some(headers) = &spec.headers {
        for (name, value) in headers {
            if HeaderName::from_bytes(name.as_bytes()).is_err() {
                return Err(ValidationError::InvalidHeader(name.clone()));
            }
            if HeaderValue::from_str(value).is_err() {
                return Err(ValidationError::InvalidHeader(name.clone()));
            }
        }
    }

    Ok(())
}

fn validate_url(raw: &str) -> Result<(), ValidationError> {
    let url = Url::parse(raw).map_err(|e| ValidationError::InvalidUrl(e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(ValidationError::UnsupportedScheme(other.to_string())),
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(()),
        _ => Err(ValidationError::MissingHost),
    }
}
