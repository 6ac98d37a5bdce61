//! Integration tests - drive the real router end to end
//!
//! Requests go through `build_router` with `tower::ServiceExt::oneshot`. The
//! database is replaced by a recording `QueryExecutor`, so these tests check
//! the SQL each route hands to storage and the JSON envelope it returns.

mod common;
mod entity_route_tests;
mod pipeline_tests;
mod temp_table_route_tests;
mod throttle_tests;
