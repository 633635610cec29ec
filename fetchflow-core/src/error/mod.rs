use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("invalid fetch task ({violations_len} violations)")]
pub struct ValidationError {
    pub violations: Vec<Violation>,
    violations_len: usize,
}

impl ValidationError {
    pub fn new(violations: Vec<Violation>) -> Self {
        let violations_len = violations.len();
        Self {
            violations,
            violations_len,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub path: String,
    pub message: String,
}

impl Violation {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Why a single fetch did not produce items.
///
/// Breaker rejections and validation failures are kept apart from downstream
/// failures so callers can tell "dependency unavailable" and "bad request"
/// from "request failed".
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetchError {
    #[error("transient fetch failure: {message}")]
    Transient { message: String },
    #[error("rate limited by dependency: {message}")]
    RateLimited { message: String },
    #[error("circuit breaker for '{dependency}' is open (retry in {retry_in_ms}ms)")]
    BreakerOpen { dependency: String, retry_in_ms: u64 },
    #[error("invalid task: {}", format_violations(.violations))]
    Validation { violations: Vec<Violation> },
    #[error("worker failure: {message}")]
    Worker { message: String },
    #[error("fetch cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    Transient,
    RateLimited,
    BreakerOpen,
    Validation,
    Worker,
    Cancelled,
}

impl FetchError {
    pub fn transient(message: impl Into<String>) -> Self {
        FetchError::Transient {
            message: message.into(),
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        FetchError::RateLimited {
            message: message.into(),
        }
    }

    pub fn worker(message: impl Into<String>) -> Self {
        FetchError::Worker {
            message: message.into(),
        }
    }

    pub fn breaker_open(dependency: impl Into<String>, retry_in: Duration) -> Self {
        FetchError::BreakerOpen {
            dependency: dependency.into(),
            retry_in_ms: retry_in.as_millis().min(u64::MAX as u128) as u64,
        }
    }

    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::Transient { .. } => FetchErrorKind::Transient,
            FetchError::RateLimited { .. } => FetchErrorKind::RateLimited,
            FetchError::BreakerOpen { .. } => FetchErrorKind::BreakerOpen,
            FetchError::Validation { .. } => FetchErrorKind::Validation,
            FetchError::Worker { .. } => FetchErrorKind::Worker,
            FetchError::Cancelled => FetchErrorKind::Cancelled,
        }
    }

    /// Whether the task may be attempted again in the retry pass.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            FetchErrorKind::Transient
                | FetchErrorKind::RateLimited
                | FetchErrorKind::BreakerOpen
                | FetchErrorKind::Worker
        )
    }
}

impl From<ValidationError> for FetchError {
    fn from(err: ValidationError) -> Self {
        FetchError::Validation {
            violations: err.violations,
        }
    }
}

fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| format!("{}: {}", v.path, v.message))
        .collect::<Vec<_>>()
        .join("; ")
}
