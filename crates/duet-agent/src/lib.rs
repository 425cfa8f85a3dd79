//! # duet-agent
//!
//! Model access and output interpretation for duet.
//!
//! - [`ModelClient`] issues one non-streaming chat completion per call
//! - [`ModelBackend`] is the seam the orchestrator is generic over
//! - [`extract`] pulls code blocks, language tags and review verdicts out of
//!   free-form model text
//!
//! Every invocation is stateless: the full conversation for a turn is passed
//! in, nothing is remembered between calls.

mod auth;
mod client;
pub mod extract;
mod mock;
mod types;

pub use auth::get_auth_token;
pub use client::{ModelBackend, ModelClient};
pub use extract::{
    extract_all_blocks, extract_block, extract_language, is_approved, CodeBlock, APPROVAL_MARKER,
};
pub use mock::{MockModelBackend, RecordedCall};
pub use types::*;
