use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FetchError, FetchErrorKind};
use crate::types::task::FetchTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Succeeded,
    Failed,
    /// Fast-failed by an open circuit breaker; the dependency was not called.
    Rejected,
    Invalid,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Succeeded => "succeeded",
            ResultStatus::Failed => "failed",
            ResultStatus::Rejected => "rejected",
            ResultStatus::Invalid => "invalid",
        }
    }
}

/// Outcome of one dispatched [`FetchTask`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResult {
    pub task_id: String,
    pub source: String,
    pub attempt: u32,
    pub items: Vec<serde_json::Value>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FetchError>,
    #[serde(rename = "duration_ms", with = "crate::types::duration_ms")]
    pub duration: Duration,
}

impl FetchResult {
    pub fn succeeded(task: &FetchTask, items: Vec<serde_json::Value>, duration: Duration) -> Self {
        Self {
            task_id: task.id.clone(),
            source: task.source.clone(),
            attempt: task.attempt,
            items,
            success: true,
            error: None,
            duration,
        }
    }

    pub fn failed(task: &FetchTask, error: FetchError, duration: Duration) -> Self {
        Self {
            task_id: task.id.clone(),
            source: task.source.clone(),
            attempt: task.attempt,
            items: Vec::new(),
            success: false,
            error: Some(error),
            duration,
        }
    }

    pub fn status(&self) -> ResultStatus {
        if self.success {
            return ResultStatus::Succeeded;
        }
        match self.error.as_ref().map(FetchError::kind) {
            Some(FetchErrorKind::BreakerOpen) => ResultStatus::Rejected,
            Some(FetchErrorKind::Validation) => ResultStatus::Invalid,
            _ => ResultStatus::Failed,
        }
    }

    /// Failed in a way the single retry pass may recover from.
    pub fn is_retryable(&self) -> bool {
        !self.success && self.error.as_ref().is_some_and(FetchError::is_retryable)
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }
}
