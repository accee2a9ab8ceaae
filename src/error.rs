//! Error types for the strata coordination layer.

use crate::types::{ContextId, Identifier, QueueId};
use thiserror::Error;

/// Errors at the durable store / query engine boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("object not found: {0}")]
    ObjectNotFound(Identifier),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure modes of a fetch operation. Fetch is all-or-nothing: a single
/// failed translation fails the whole request.
#[derive(Debug, Error)]
pub enum FetchFailure {
    #[error("query failed: {0}")]
    Query(#[source] StoreError),

    #[error("translating {id} onto {context} failed: {source}")]
    Translation {
        id: Identifier,
        context: ContextId,
        #[source]
        source: StoreError,
    },
}

/// Coordination-layer errors surfaced to callers.
///
/// Errors always travel on the same channel as success: the failure callback
/// of an asynchronous request, or the `Err` arm of a synchronous one. The
/// core never retries on the caller's behalf.
#[derive(Debug, Error)]
pub enum CoordError {
    #[error("context registry is closed")]
    RegistryClosed,

    #[error("permanent identifier allocation failed: {0}")]
    Finalize(#[source] StoreError),

    #[error("save failed at {context} ({label}): {source}")]
    Save {
        context: ContextId,
        label: String,
        #[source]
        source: StoreError,
    },

    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchFailure),

    #[error("reentrant synchronous call on {queue}")]
    ReentrantCall { queue: QueueId },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("teardown error: {0}")]
    Teardown(String),
}
