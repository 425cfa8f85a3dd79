//! Run driver: performs the I/O around the pure state machine
//!
//! Each non-terminal state maps to one step (a model turn or a sandbox run)
//! that yields the next [`Event`]. Every suspension point is raced against
//! the observer going away, so a disconnect abandons the in-flight request or
//! kills the in-flight subprocess and ends the run ABORTED.

use std::future::Future;

use duet_agent::{
    extract_block, extract_language, is_approved, ChatMessage, ModelBackend, ModelReply,
};
use duet_core::{Agent, CodeArtifact, DuetError, Result, Role, RoleModels, Task, TestArtifact};
use duet_sandbox::Sandbox;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::events::{Activity, AgentEvent, EventPublisher};
use crate::outcome::RunOutcome;
use crate::prompt::{coding_messages, diagnosis_messages, planning_messages, review_messages};
use crate::run::Run;
use crate::state_machine::{transition, Action, Event, State};

/// Default output token cap per model turn
pub const DEFAULT_MAX_TOKENS: usize = 4096;

/// Summary of a finished run, mirroring what the event stream reported
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub outcome: RunOutcome,
    /// Highest round reached, 0 when the run never left planning
    pub rounds: u32,
    pub final_code: String,
    pub final_tests: Option<String>,
    /// Fatal diagnostic for aborted runs
    pub error: Option<String>,
    /// True when the observer disconnected
    pub cancelled: bool,
}

/// Drives planner and implementer turns through the TDD loop
pub struct Orchestrator<M: ModelBackend, S: Sandbox> {
    models: M,
    sandbox: S,
    max_tokens: usize,
}

impl<M: ModelBackend, S: Sandbox> Orchestrator<M, S> {
    pub fn new(models: M, sandbox: S) -> Self {
        Self {
            models,
            sandbox,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// Override the output token cap passed to every model turn
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Run one task to a terminal state, reporting through `publisher`.
    ///
    /// Never fails: fatal problems end the run ABORTED and are reported both
    /// in the event stream and in the returned report.
    #[instrument(skip_all, fields(task = %task.description()))]
    pub async fn run(&self, task: Task, models: RoleModels, publisher: &EventPublisher) -> RunReport {
        let mut run = Run::new(task, models);
        info!(run_id = %run.id, "Starting run");

        let mut state = State::Planning;
        let mut cancelled = false;

        while !state.is_terminal() {
            let event = match self.step(&state, &mut run, publisher).await {
                Ok(event) => event,
                Err(e) => failure_event(e),
            };
            if event == Event::Cancelled {
                cancelled = true;
            }

            let (next, actions) = transition(state, event);
            debug!(state = ?next, "transition");
            state = next;

            if cancelled {
                break;
            }
            if let Err(e) = self.apply(&actions, &mut run, publisher).await {
                warn!("Observer lost while reporting: {}", e);
                cancelled = true;
                state = State::Aborted {
                    error: "Run cancelled".to_string(),
                };
            }
        }

        self.finish(state, run, cancelled, publisher).await
    }

    /// Perform the work of one non-terminal state
    async fn step(&self, state: &State, run: &mut Run, publisher: &EventPublisher) -> Result<Event> {
        match state {
            State::Planning => self.plan(run, publisher).await,
            State::Coding { .. } => self.code(run, publisher).await,
            State::Testing { .. } => self.test(run, publisher).await,
            State::Reviewing { .. } => self.review(run, publisher).await,
            State::Diagnosing { .. } => self.diagnose(run, publisher).await,
            State::Done | State::Exhausted | State::Aborted { .. } => Err(DuetError::RunFinished),
        }
    }

    async fn apply(&self, actions: &[Action], run: &mut Run, publisher: &EventPublisher) -> Result<()> {
        for action in actions {
            match action {
                Action::StartRound { number } => {
                    run.round = *number;
                    info!("=== Round {} of {} ===", number, run.max_rounds);
                    publisher.emit(AgentEvent::Round { number: *number }).await?;
                }
                Action::Notify { text } => {
                    publisher
                        .emit(AgentEvent::Error { text: text.clone() })
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn plan(&self, run: &mut Run, publisher: &EventPublisher) -> Result<Event> {
        self.start(publisher, Agent::Boss, Activity::Planning, "Drafting a plan and test suite")
            .await?;

        let reply = self
            .invoke(Role::Planner, planning_messages(&run.task), run, publisher)
            .await?;

        run.language = extract_language(&reply.text);
        run.tests = TestArtifact::new(extract_block(&reply.text, Some(run.language.as_str())));
        run.plan = Some(reply.text);

        match &run.tests {
            Some(tests) => {
                info!(language = %run.language, "Planner produced tests");
                publisher
                    .emit(AgentEvent::CodeUpdate {
                        code: None,
                        tests: Some(tests.as_str().to_string()),
                    })
                    .await?;
                Ok(Event::PlanReady { has_tests: true })
            }
            None => {
                warn!("Planner reply contained no test block");
                Ok(Event::PlanReady { has_tests: false })
            }
        }
    }

    async fn code(&self, run: &mut Run, publisher: &EventPublisher) -> Result<Event> {
        let note = format!("Writing {} code for round {}", run.language, run.round);
        self.start(publisher, Agent::Worker, Activity::Coding, &note)
            .await?;

        let reply = self
            .invoke(Role::Implementer, coding_messages(run), run, publisher)
            .await?;

        let code = extract_block(&reply.text, Some(run.language.as_str()));
        if code.is_empty() {
            warn!(round = run.round, "Implementer reply contained no code block");
        }
        run.code = Some(CodeArtifact::new(code.clone(), run.language.clone()));

        publisher
            .emit(AgentEvent::CodeUpdate {
                code: Some(code),
                tests: None,
            })
            .await?;
        Ok(Event::CodeReady)
    }

    async fn test(&self, run: &mut Run, publisher: &EventPublisher) -> Result<Event> {
        self.start(publisher, Agent::Tester, Activity::Running, "Running the test suite")
            .await?;

        let result = guarded(
            publisher,
            self.sandbox
                .run(run.code_text(), run.tests_text(), &run.language),
        )
        .await?;

        info!(
            round = run.round,
            "Tests: {} passed, {} failed", result.passed, result.failed
        );
        let event = Event::TestsFinished {
            passed: result.passed,
            failed: result.failed,
        };
        run.last_result = Some(result.clone());
        publisher.emit(AgentEvent::TestRun { result }).await?;
        Ok(event)
    }

    async fn review(&self, run: &mut Run, publisher: &EventPublisher) -> Result<Event> {
        self.start(publisher, Agent::Boss, Activity::Reviewing, "Reviewing passing code")
            .await?;

        let reply = self
            .invoke(Role::Planner, review_messages(run), run, publisher)
            .await?;

        if is_approved(&reply.text) {
            info!(round = run.round, "Planner approved");
            Ok(Event::Approved)
        } else {
            info!(round = run.round, "Planner requested changes");
            run.feedback = Some(reply.text);
            Ok(Event::NeedsWork)
        }
    }

    async fn diagnose(&self, run: &mut Run, publisher: &EventPublisher) -> Result<Event> {
        self.start(publisher, Agent::Boss, Activity::Diagnosing, "Diagnosing test failures")
            .await?;

        let reply = self
            .invoke(Role::Planner, diagnosis_messages(run), run, publisher)
            .await?;
        run.feedback = Some(reply.text);
        Ok(Event::Diagnosed)
    }

    async fn start(
        &self,
        publisher: &EventPublisher,
        agent: Agent,
        action: Activity,
        note: &str,
    ) -> Result<()> {
        publisher.emit(AgentEvent::AgentStart { agent, action }).await?;
        publisher
            .emit(AgentEvent::AgentThinking {
                agent,
                text: note.to_string(),
            })
            .await
    }

    /// One model turn; the full reply is reported as an `agent_message`
    async fn invoke(
        &self,
        role: Role,
        messages: Vec<ChatMessage>,
        run: &Run,
        publisher: &EventPublisher,
    ) -> Result<ModelReply> {
        let model = run.models.for_role(role);
        debug!(%role, model, "Invoking model");

        let reply = guarded(
            publisher,
            self.models.invoke(model, &messages, self.max_tokens),
        )
        .await?
        .map_err(|e| {
            warn!(%role, model, "Model call failed: {}", e);
            e
        })?;

        publisher
            .emit(AgentEvent::AgentMessage {
                agent: role.agent(),
                text: reply.text.clone(),
            })
            .await?;
        Ok(reply)
    }

    /// Emit the terminal event for `state` and build the report
    async fn finish(
        &self,
        state: State,
        run: Run,
        cancelled: bool,
        publisher: &EventPublisher,
    ) -> RunReport {
        let (outcome, error) = match &state {
            State::Done => (RunOutcome::Approved, None),
            State::Exhausted => (RunOutcome::Exhausted, None),
            State::Aborted { error } => (RunOutcome::Aborted, Some(error.clone())),
            other => (
                RunOutcome::Aborted,
                Some(format!("Run stopped in non-terminal state {:?}", other)),
            ),
        };

        let final_tests = run.tests.as_ref().map(|t| t.as_str().to_string());
        let final_code = match outcome {
            RunOutcome::Aborted => String::new(),
            _ => run.code_text().to_string(),
        };

        if cancelled {
            // The observer is gone; a closing notice is best effort only
            let delivered = publisher.try_emit(AgentEvent::Error {
                text: "Run cancelled: observer disconnected".to_string(),
            });
            warn!(run_id = %run.id, delivered, "Run cancelled");
        } else {
            let complete = AgentEvent::Complete {
                final_code: final_code.clone(),
                final_tests: match outcome {
                    RunOutcome::Aborted => None,
                    _ => final_tests.clone(),
                },
                plan: match outcome {
                    RunOutcome::Approved => run.plan.clone(),
                    _ => None,
                },
            };
            if let Err(e) = publisher.emit(complete).await {
                warn!("Could not deliver terminal event: {}", e);
            }
        }

        info!(run_id = %run.id, %outcome, rounds = run.round, "Run finished");
        RunReport {
            run_id: run.id,
            outcome,
            rounds: run.round,
            final_code,
            final_tests,
            error,
            cancelled,
        }
    }
}

/// Race `fut` against the observer disconnecting
async fn guarded<F: Future>(publisher: &EventPublisher, fut: F) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = publisher.closed() => Err(DuetError::ObserverGone),
        out = fut => Ok(out),
    }
}

fn failure_event(err: DuetError) -> Event {
    match err {
        DuetError::ObserverGone | DuetError::RunFinished => Event::Cancelled,
        other => Event::ModelFailed {
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_event_mapping() {
        assert_eq!(failure_event(DuetError::ObserverGone), Event::Cancelled);
        assert_eq!(
            failure_event(DuetError::ModelInvocationFailed("timeout".to_string())),
            Event::ModelFailed {
                message: "Model invocation failed: timeout".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_guarded_passes_through_while_observed() {
        let (publisher, _stream) = EventPublisher::channel(1);
        let out = guarded(&publisher, async { 7 }).await.unwrap();
        assert_eq!(out, 7);
    }

    #[tokio::test]
    async fn test_guarded_abandons_on_disconnect() {
        let (publisher, stream) = EventPublisher::channel(1);
        drop(stream);
        let err = guarded(&publisher, std::future::pending::<()>())
            .await
            .unwrap_err();
        assert!(matches!(err, DuetError::ObserverGone));
    }
}
