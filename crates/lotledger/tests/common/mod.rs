//! Shared test utilities for lotledger integration tests.
//!
//! This module provides:
//! - `TestHarness` wiring an orchestrator over in-memory stores in a temp dir
//! - Builders for invoice PDFs, metadata sheets and classification rules

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
