//! # duet-core
//!
//! Core types for the duet TDD orchestration loop.
//!
//! A run pairs two model roles: a planner that writes the test suite and judges
//! the result, and an implementer that writes code until the suite passes.
//!
//! ## Core Paradigm
//!
//! - Tests are the oracle (authored once, never rewritten)
//! - Code is replaced wholesale every round
//! - Sandbox results are ephemeral and never merged across rounds

pub mod config;
mod error;
mod types;

pub use config::{DuetConfig, ModelConfig, SandboxConfig, ServerConfig};
pub use error::{DuetError, Result};
pub use types::*;
