//! Route handlers, one module per resource

pub mod aggregate;
pub mod alerts;
pub mod dead_letters;
pub mod health;
pub mod push;
pub mod stats;

use crate::api::state::{DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT};
use crate::api::types::ListQuery;

/// `?limit=` clamped to `[1, MAX_LIST_LIMIT]`
pub(crate) fn list_limit(query: &ListQuery) -> usize {
    query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT)
}
