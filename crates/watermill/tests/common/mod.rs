//! Shared test utilities for watermill integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated runs with a temp database, uploads and cache
//! - Fake watermark transforms that record what they were asked to do
//! - A minimal PDF builder

pub mod fakes;
pub mod harness;
pub mod pdf;

pub use fakes::*;
pub use harness::TestHarness;
pub use pdf::{page_text, write_sample_pdf};
