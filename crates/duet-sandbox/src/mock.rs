//! Scripted sandbox for orchestrator tests

use crate::runner::Sandbox;
use async_trait::async_trait;
use duet_core::{Language, SandboxResult};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Sandbox that replays queued results and records what it was asked to run
#[derive(Clone, Default)]
pub struct ScriptedSandbox {
    results: Arc<Mutex<VecDeque<SandboxResult>>>,
    runs: Arc<Mutex<Vec<(String, String, Language)>>>,
    delay: Option<Duration>,
}

impl ScriptedSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next result
    pub fn with_result(self, result: SandboxResult) -> Self {
        if let Ok(mut results) = self.results.lock() {
            results.push_back(result);
        }
        self
    }

    /// Sleep before answering each run
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// `(code, tests, language)` of every run so far
    pub fn runs(&self) -> Vec<(String, String, Language)> {
        self.runs.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Sandbox for ScriptedSandbox {
    async fn run(&self, code: &str, tests: &str, language: &Language) -> SandboxResult {
        if let Ok(mut runs) = self.runs.lock() {
            runs.push((code.to_string(), tests.to_string(), language.clone()));
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.results
            .lock()
            .ok()
            .and_then(|mut results| results.pop_front())
            .unwrap_or_else(|| SandboxResult::infrastructure_failure("no scripted result"))
    }
}
