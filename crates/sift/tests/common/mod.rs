//! Shared test utilities for sift integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated orchestration with a temp database and blob store
//! - Scripted plugin types whose behaviour is driven by config params

pub mod harness;
pub mod plugins;

pub use harness::TestHarness;
pub use plugins::{CountingUpdaterClass, ScriptedClass, COUNTING_PATH, SCRIPTED_PATH};
