//! Shared test utilities for creative-analysis integration tests.
//!
//! This module provides:
//! - `TestHarness` wiring a pipeline to an in-memory store and temp directories
//! - Fakes for the inference stages, the vector index and the blob store

pub mod fakes;
pub mod harness;

pub use fakes::*;
pub use harness::TestHarness;
