//! Shared state passed to all API handlers

use crate::pipeline::Pipeline;

/// Default number of records returned by list endpoints
pub const DEFAULT_LIST_LIMIT: usize = 50;

/// Upper bound for the `limit` query parameter
pub const MAX_LIST_LIMIT: usize = 1_000;

#[derive(Clone)]
pub struct ApiState {
    pub pipeline: Pipeline,
}

impl ApiState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }
}
