#![forbid(unsafe_code)]

pub mod error;
pub mod summary;
pub mod types;
pub mod validate;

pub use crate::error::{FetchError, FetchErrorKind, ValidationError, Violation};
pub use crate::summary::{failed_sources, BatchSummary};
pub use crate::types::{FetchParams, FetchResult, FetchTask, ResultStatus, MAX_FETCH_LIMIT};
pub use crate::validate::{validate_source, validate_task, Validate};
