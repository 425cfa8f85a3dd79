//! # duet-sandbox
//!
//! Runs a code/test pair and reports `{passed, failed, total}`.
//!
//! Each call gets a fresh, uniquely named working directory that is removed
//! before the call returns. Execution is bounded by a wall-clock timeout and a
//! cap on captured output; exceeding either is a failure, never a hang.
//! Infrastructure problems (no working directory, missing interpreter) come
//! back as failing results rather than errors.

mod language;
mod mock;
pub mod parse;
mod process;
mod runner;

pub use language::{Step, Strategy};
pub use mock::ScriptedSandbox;
pub use parse::{classify, Classification};
pub use process::{run_limited, ProcessOutput, Termination};
pub use runner::{Sandbox, SandboxRunner, WORKDIR_PREFIX};
