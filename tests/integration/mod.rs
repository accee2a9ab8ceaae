//! Integration tests for the strata coordination layer.

mod fetch_translation;
mod notification_bridge;
mod registry_lifecycle;
mod save_chain;
mod test_utils;
