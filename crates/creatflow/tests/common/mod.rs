//! Shared test utilities for creatflow integration tests.
//!
//! This module provides:
//! - `TestHarness`: an isolated app over a temp upload root, an in-memory
//!   store and a manual clock
//! - Builders for configs and catalog records
//! - `ScriptedAi`, a deterministic AI provider double

pub mod ai;
pub mod builders;
pub mod harness;

pub use ai::ScriptedAi;
pub use builders::*;
pub use harness::{TestHarness, USER};
