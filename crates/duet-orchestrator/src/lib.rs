//! # duet-orchestrator
//!
//! The round-based TDD loop.
//!
//! A run plans once (tests + language), then alternates implementer attempts
//! with sandbox checks and planner verdicts for at most [`MAX_ROUNDS`] rounds:
//!
//! ```text
//! PLANNING -> CODING -> TESTING -> REVIEWING  -> DONE
//!                ^                 DIAGNOSING
//!                |___________________|  (next round, or EXHAUSTED)
//! ```
//!
//! Every step is reported through an [`EventPublisher`] whose single
//! consumer sees the complete, ordered audit trail of the run.

mod events;
mod orchestrator;
mod outcome;
mod prompt;
mod run;
mod state_machine;

pub use events::{Activity, AgentEvent, EventPublisher, EventStream};
pub use orchestrator::{Orchestrator, RunReport, DEFAULT_MAX_TOKENS};
pub use outcome::RunOutcome;
pub use prompt::{
    coding_messages, diagnosis_messages, planning_messages, review_messages, truncate_output,
};
pub use run::Run;
pub use state_machine::{transition, Action, Event, State, CEILING_NOTICE_PREFIX, MAX_ROUNDS};
