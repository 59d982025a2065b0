//! Integration tests for the query-context lifecycle manager


mod ensure_query;
mod subscription_teardown;
