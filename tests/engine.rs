//! Integration tests for the engine stores.
//!
//! This test file aggregates all engine component tests.

// Test modules from the engine subdirectory
mod imagery_cache_test;
mod route_store_test;
