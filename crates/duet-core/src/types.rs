//! Core type definitions for duet runs

use serde::{Deserialize, Serialize};
use std::fmt;

/// Language used when the planner does not name one
pub const DEFAULT_LANGUAGE: &str = "python";

/// The two model roles of a run.
///
/// The transitions of the loop are role-specific, so this is a closed set
/// rather than an open registry of agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Writes the plan and tests, then reviews or diagnoses each round
    Planner,
    /// Writes the implementation
    Implementer,
}

impl Role {
    /// The agent name this role reports under in the event stream
    pub fn agent(&self) -> Agent {
        match self {
            Role::Planner => Agent::Boss,
            Role::Implementer => Agent::Worker,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Planner => write!(f, "planner"),
            Role::Implementer => write!(f, "implementer"),
        }
    }
}

/// Agent names as seen by the observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Agent {
    /// The planner/reviewer
    Boss,
    /// The implementer
    Worker,
    /// The sandbox
    Tester,
}

impl fmt::Display for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Agent::Boss => write!(f, "boss"),
            Agent::Worker => write!(f, "worker"),
            Agent::Tester => write!(f, "tester"),
        }
    }
}

/// Natural-language description of what to build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Task(String);

impl Task {
    pub fn new(description: impl Into<String>) -> Self {
        Self(description.into())
    }

    pub fn description(&self) -> &str {
        &self.0
    }
}

/// Model identifiers assigned to each role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleModels {
    pub planner: String,
    pub implementer: String,
}

impl RoleModels {
    pub fn new(planner: impl Into<String>, implementer: impl Into<String>) -> Self {
        Self {
            planner: planner.into(),
            implementer: implementer.into(),
        }
    }

    /// Model id for the given role
    pub fn for_role(&self, role: Role) -> &str {
        match role {
            Role::Planner => &self.planner,
            Role::Implementer => &self.implementer,
        }
    }
}

/// Implementation language identifier, always lower-case
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Language(String);

impl Language {
    /// Normalize an identifier; blank input yields the default language
    pub fn new(id: &str) -> Self {
        let id = id.trim().to_lowercase();
        if id.is_empty() {
            Self::default()
        } else {
            Self(id)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Language {
    fn default() -> Self {
        Self(DEFAULT_LANGUAGE.to_string())
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A candidate implementation. Replaced, never merged, each implementer turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeArtifact {
    pub code: String,
    pub language: Language,
}

impl CodeArtifact {
    pub fn new(code: impl Into<String>, language: Language) -> Self {
        Self {
            code: code.into(),
            language,
        }
    }
}

/// The test suite written by the planner's first turn.
///
/// There is no mutable access to the text once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestArtifact(String);

impl TestArtifact {
    /// Wrap extracted test text; returns `None` when there is nothing to run
    pub fn new(tests: impl Into<String>) -> Option<Self> {
        let tests = tests.into();
        if tests.trim().is_empty() {
            None
        } else {
            Some(Self(tests))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Outcome of one sandbox execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxResult {
    pub passed: u32,
    pub failed: u32,
    /// `passed + failed`, never below 1
    pub total: u32,
    /// Combined stdout/stderr, bounded by the sandbox output limit
    pub output: String,
}

impl SandboxResult {
    /// Build a result from counts, enforcing the `total >= 1` floor
    pub fn from_counts(passed: u32, failed: u32, output: impl Into<String>) -> Self {
        Self {
            passed,
            failed,
            total: passed.saturating_add(failed).max(1),
            output: output.into(),
        }
    }

    /// A failing result for when the sandbox itself could not run the code
    pub fn infrastructure_failure(reason: impl Into<String>) -> Self {
        Self::from_counts(0, 1, format!("[sandbox error] {}", reason.into()))
    }

    /// True when every test passed and at least one ran
    pub fn is_pass(&self) -> bool {
        self.failed == 0 && self.passed > 0
    }
}
