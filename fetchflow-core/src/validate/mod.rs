mod validator;

use crate::error::ValidationError;
use crate::types::{FetchParams, FetchTask};
use validator::Validator;

pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError>;
}

impl Validate for FetchTask {
    fn validate(&self) -> Result<(), ValidationError> {
        validate_task(self)
    }
}

impl Validate for FetchParams {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut v = Validator::default();
        v.validate_params("params", self);
        v.finish()
    }
}

pub fn validate_task(task: &FetchTask) -> Result<(), ValidationError> {
    let mut v = Validator::default();
    v.validate_task(task);
    v.finish()
}

pub fn validate_source(source: &str) -> Result<(), ValidationError> {
    let mut v = Validator::default();
    v.validate_source("source", source);
    v.finish()
}
