//! Run outcome classification from the event stream alone

use crate::events::AgentEvent;
use crate::state_machine::CEILING_NOTICE_PREFIX;
use serde::{Deserialize, Serialize};

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    /// Tests passed and the planner approved
    Approved,
    /// Round ceiling reached; best-effort code was returned
    Exhausted,
    /// Fatal failure or cancellation; no usable code
    Aborted,
}

impl RunOutcome {
    /// Classify a finished stream.
    ///
    /// The notice preceding `complete` decides, not the code it carries:
    /// - no `error` at all: approved
    /// - the round-ceiling notice: exhausted
    /// - any other `error`, or a trailing `error`: aborted
    ///
    /// Returns `None` while the stream has not ended.
    pub fn from_events(events: &[AgentEvent]) -> Option<RunOutcome> {
        let (last, earlier) = events.split_last()?;
        match last {
            AgentEvent::Complete { .. } => {
                let notice = earlier.iter().rev().find_map(|e| match e {
                    AgentEvent::Error { text } => Some(text.as_str()),
                    _ => None,
                });
                Some(match notice {
                    None => RunOutcome::Approved,
                    Some(text) if text.starts_with(CEILING_NOTICE_PREFIX) => {
                        RunOutcome::Exhausted
                    }
                    Some(_) => RunOutcome::Aborted,
                })
            }
            AgentEvent::Error { .. } => Some(RunOutcome::Aborted),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Approved => write!(f, "approved"),
            RunOutcome::Exhausted => write!(f, "exhausted"),
            RunOutcome::Aborted => write!(f, "aborted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete(code: &str) -> AgentEvent {
        AgentEvent::Complete {
            final_code: code.to_string(),
            final_tests: None,
            plan: None,
        }
    }

    fn error(text: &str) -> AgentEvent {
        AgentEvent::Error {
            text: text.to_string(),
        }
    }

    #[test]
    fn test_three_outcomes_are_distinguishable() {
        let approved = vec![AgentEvent::Round { number: 1 }, complete("code")];
        let exhausted = vec![
            AgentEvent::Round { number: 5 },
            error("Max rounds (5) reached. Returning best-effort code."),
            complete("code"),
        ];
        let aborted = vec![error("Planner failed to generate tests"), complete("")];

        assert_eq!(RunOutcome::from_events(&approved), Some(RunOutcome::Approved));
        assert_eq!(RunOutcome::from_events(&exhausted), Some(RunOutcome::Exhausted));
        assert_eq!(RunOutcome::from_events(&aborted), Some(RunOutcome::Aborted));
    }

    #[test]
    fn test_empty_code_does_not_decide_outcome() {
        let approved = vec![AgentEvent::Round { number: 1 }, complete("")];
        let exhausted = vec![
            error("Max rounds (5) reached. Returning best-effort code."),
            complete(""),
        ];
        assert_eq!(RunOutcome::from_events(&approved), Some(RunOutcome::Approved));
        assert_eq!(RunOutcome::from_events(&exhausted), Some(RunOutcome::Exhausted));
    }

    #[test]
    fn test_model_failure_with_code_is_still_abort() {
        let events = vec![
            AgentEvent::Round { number: 2 },
            error("Model invocation failed: timeout"),
            complete(""),
        ];
        assert_eq!(RunOutcome::from_events(&events), Some(RunOutcome::Aborted));
    }

    #[test]
    fn test_trailing_error_is_abort() {
        let cancelled = vec![AgentEvent::Round { number: 2 }, error("Run cancelled")];
        assert_eq!(RunOutcome::from_events(&cancelled), Some(RunOutcome::Aborted));
    }

    #[test]
    fn test_unfinished_stream() {
        assert_eq!(RunOutcome::from_events(&[]), None);
        assert_eq!(
            RunOutcome::from_events(&[AgentEvent::Round { number: 1 }]),
            None
        );
    }
}
