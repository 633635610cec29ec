use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Upper bound on items requested from one source in one fetch.
pub const MAX_FETCH_LIMIT: u32 = 1000;

/// Parameters forwarded verbatim to the fetch collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchParams {
    pub limit: u32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

impl Default for FetchParams {
    fn default() -> Self {
        Self {
            limit: 100,
            options: BTreeMap::new(),
        }
    }
}

impl FetchParams {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// One scheduled fetch of one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchTask {
    pub id: String,
    pub source: String,
    pub params: FetchParams,
    /// 0 on the first pass, 1 on the retry pass.
    pub attempt: u32,
}

impl FetchTask {
    /// `index` is the position of the source in the submitted batch, which
    /// keeps ids unique even when a source is listed twice.
    pub fn new(index: usize, source: impl Into<String>, params: FetchParams) -> Self {
        let source = source.into();
        Self {
            id: format!("task_{index}_{source}"),
            source,
            params,
            attempt: 0,
        }
    }

    pub fn for_retry(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}
