//! Pure state machine for the TDD loop
//!
//! No I/O happens here: `transition(state, event) -> (state, actions)` is
//! deterministic, and the driver in `orchestrator` performs the model calls,
//! sandbox runs and event emission around it.
//!
//! - Invalid transitions abort the run (never panic)
//! - Terminal states absorb every event, so a run ends exactly once

/// Round ceiling for every run
pub const MAX_ROUNDS: u32 = 5;

/// Start of the notice sent when the ceiling is reached
pub const CEILING_NOTICE_PREFIX: &str = "Max rounds";

/// Loop state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    /// Round 0: planner writes the plan, language and tests
    Planning,
    /// Implementer is writing code for `round`
    Coding { round: u32 },
    /// Sandbox is checking the code of `round`
    Testing { round: u32 },
    /// Tests pass; planner decides whether to approve
    Reviewing { round: u32 },
    /// Tests fail; planner writes a fix description
    Diagnosing { round: u32 },
    /// Planner approved passing code
    Done,
    /// Round ceiling reached without approval
    Exhausted,
    /// Fatal failure or cancellation
    Aborted { error: String },
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Done | State::Exhausted | State::Aborted { .. })
    }

    /// Current round, 0 while planning or once terminal
    pub fn round(&self) -> u32 {
        match self {
            State::Coding { round }
            | State::Testing { round }
            | State::Reviewing { round }
            | State::Diagnosing { round } => *round,
            _ => 0,
        }
    }
}

/// Inputs that drive transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Planner turn finished; `has_tests` is false when no test block was found
    PlanReady { has_tests: bool },
    /// Implementer turn finished
    CodeReady,
    /// Sandbox finished
    TestsFinished { passed: u32, failed: u32 },
    /// Review contained the approval marker
    Approved,
    /// Review asked for changes
    NeedsWork,
    /// Diagnosis written
    Diagnosed,
    /// A model call failed; never retried
    ModelFailed { message: String },
    /// The observer went away
    Cancelled,
}

/// Side effects the driver performs after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Announce the start of a round
    StartRound { number: u32 },
    /// Report a non-terminal error notice to the observer
    Notify { text: String },
}

/// Pure state transition function
///
/// Takes current state and event, returns new state and actions to execute.
pub fn transition(state: State, event: Event) -> (State, Vec<Action>) {
    match (state, event) {
        // Terminal states never leave
        (state, _) if state.is_terminal() => (state, vec![]),

        (_, Event::Cancelled) => (
            State::Aborted {
                error: "Run cancelled".to_string(),
            },
            vec![],
        ),

        (_, Event::ModelFailed { message }) => (
            State::Aborted {
                error: message.clone(),
            },
            vec![Action::Notify { text: message }],
        ),

        // From Planning
        (State::Planning, Event::PlanReady { has_tests: true }) => (
            State::Coding { round: 1 },
            vec![Action::StartRound { number: 1 }],
        ),

        (State::Planning, Event::PlanReady { has_tests: false }) => {
            let error = "Planner failed to generate tests".to_string();
            (
                State::Aborted {
                    error: error.clone(),
                },
                vec![Action::Notify { text: error }],
            )
        }

        // From Coding
        (State::Coding { round }, Event::CodeReady) => (State::Testing { round }, vec![]),

        // From Testing
        (State::Testing { round }, Event::TestsFinished { passed, failed }) => {
            if failed == 0 && passed > 0 {
                (State::Reviewing { round }, vec![])
            } else {
                (State::Diagnosing { round }, vec![])
            }
        }

        // From Reviewing
        (State::Reviewing { .. }, Event::Approved) => (State::Done, vec![]),
        (State::Reviewing { round }, Event::NeedsWork) => next_round(round),

        // From Diagnosing
        (State::Diagnosing { round }, Event::Diagnosed) => next_round(round),

        // All other invalid transitions
        (state, event) => {
            let error = format!(
                "Invalid state transition: {:?} cannot handle event {:?}",
                state, event
            );
            (
                State::Aborted {
                    error: error.clone(),
                },
                vec![Action::Notify { text: error }],
            )
        }
    }
}

fn next_round(round: u32) -> (State, Vec<Action>) {
    let next = round + 1;
    if next <= MAX_ROUNDS {
        (
            State::Coding { round: next },
            vec![Action::StartRound { number: next }],
        )
    } else {
        (
            State::Exhausted,
            vec![Action::Notify {
                text: format!(
                    "{} ({}) reached. Returning best-effort code.",
                    CEILING_NOTICE_PREFIX, MAX_ROUNDS
                ),
            }],
        )
    }
}
