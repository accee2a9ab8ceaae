//! Strata: queue-affine coordination for hierarchical object graph stores.
//!
//! Callers acquire a per-queue background context from a shared registry,
//! submit saves that propagate hop by hop up the context chain to a durable
//! root store, fetch query results translated onto their own context, and
//! subscribe contexts to one another's did-save events.

pub mod api;
pub mod bus;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod exec;
pub mod fetch;
pub mod logging;
pub mod registry;
pub mod save;
pub mod store;
pub mod types;

pub use api::Coordinator;
pub use error::{CoordError, FetchFailure, StoreError};
