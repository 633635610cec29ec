use std::sync::LazyLock;

use regex::Regex;

use crate::error::{ValidationError, Violation};
use crate::types::{FetchParams, FetchTask, MAX_FETCH_LIMIT};

pub(crate) static SOURCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.:/\-]*$").expect("valid"));
pub(crate) static OPTION_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9\.\-_]+$").expect("valid"));

const MAX_SOURCE_LEN: usize = 100;

#[derive(Debug, Default)]
pub struct Validator {
    violations: Vec<Violation>,
}

impl Validator {
    pub fn finish(self) -> Result<(), ValidationError> {
        if self.violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::new(self.violations))
        }
    }

    pub fn validate_task(&mut self, task: &FetchTask) {
        if task.id.trim().is_empty() {
            self.push("id", "must not be empty");
        }
        self.validate_source("source", &task.source);
        self.validate_params("params", &task.params);
    }

    pub(crate) fn validate_source(&mut self, path: &str, source: &str) {
        if source.is_empty() {
            self.push(path, "must not be empty");
            return;
        }
        if source.len() > MAX_SOURCE_LEN {
            self.push(path, format!("must be at most {MAX_SOURCE_LEN} characters"));
        }
        if !SOURCE_RE.is_match(source) {
            self.push(
                path,
                "must match regex ^[A-Za-z0-9_][A-Za-z0-9_.:/\\-]*$",
            );
        }
    }

    pub(crate) fn validate_params(&mut self, path: &str, params: &FetchParams) {
        if params.limit == 0 || params.limit > MAX_FETCH_LIMIT {
            self.push(
                format!("{path}.limit"),
                format!("must be between 1 and {MAX_FETCH_LIMIT}"),
            );
        }
        for key in params.options.keys() {
            if !OPTION_KEY_RE.is_match(key) {
                self.push(
                    format!("{path}.options.{key}"),
                    "option key must match regex ^[a-zA-Z0-9\\.\\-_]+$",
                );
            }
        }
    }

    fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.violations.push(Violation::new(path, message));
    }
}
