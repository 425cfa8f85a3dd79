//! Per-run working state owned by the orchestrator

use duet_core::{CodeArtifact, Language, RoleModels, SandboxResult, Task, TestArtifact};
use uuid::Uuid;

use crate::state_machine::MAX_ROUNDS;

/// Everything the loop knows about one run.
///
/// Created at PLANNING, mutated only by the orchestrator between transitions,
/// dropped once the terminal event is out.
#[derive(Debug, Clone)]
pub struct Run {
    pub id: Uuid,
    pub task: Task,
    pub models: RoleModels,
    /// 0 while planning, then 1..=max_rounds
    pub round: u32,
    pub max_rounds: u32,
    /// Full text of the planner's first turn
    pub plan: Option<String>,
    pub tests: Option<TestArtifact>,
    pub language: Language,
    pub code: Option<CodeArtifact>,
    pub last_result: Option<SandboxResult>,
    /// Latest review or diagnosis text
    pub feedback: Option<String>,
}

impl Run {
    pub fn new(task: Task, models: RoleModels) -> Self {
        Self {
            id: Uuid::new_v4(),
            task,
            models,
            round: 0,
            max_rounds: MAX_ROUNDS,
            plan: None,
            tests: None,
            language: Language::default(),
            code: None,
            last_result: None,
            feedback: None,
        }
    }

    /// Current code, empty before the first implementer turn
    pub fn code_text(&self) -> &str {
        self.code.as_ref().map(|c| c.code.as_str()).unwrap_or("")
    }

    /// Test suite, empty before planning succeeded
    pub fn tests_text(&self) -> &str {
        self.tests.as_ref().map(TestArtifact::as_str).unwrap_or("")
    }

    /// Sandbox output of the last round, empty before any test run
    pub fn last_output(&self) -> &str {
        self.last_result
            .as_ref()
            .map(|r| r.output.as_str())
            .unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_run_starts_in_planning_round() {
        let run = Run::new(Task::new("reverse a string"), RoleModels::new("p", "i"));
        assert_eq!(run.round, 0);
        assert_eq!(run.max_rounds, 5);
        assert_eq!(run.language.as_str(), "python");
        assert_eq!(run.code_text(), "");
        assert_eq!(run.tests_text(), "");
        assert_eq!(run.last_output(), "");
    }

    #[test]
    fn test_runs_get_distinct_ids() {
        let models = RoleModels::new("p", "i");
        let a = Run::new(Task::new("a"), models.clone());
        let b = Run::new(Task::new("a"), models);
        assert_ne!(a.id, b.id);
    }
}
