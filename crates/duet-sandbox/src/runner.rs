//! Sandbox runner: one isolated working directory per call

use crate::language::Strategy;
use crate::parse::classify;
use crate::process::{run_limited, Termination};
use async_trait::async_trait;
use duet_core::{DuetError, Language, Result, SandboxConfig, SandboxResult};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

/// Prefix of every working directory, so strays are easy to spot
pub const WORKDIR_PREFIX: &str = "duet-sandbox-";

/// Trait for running a code/test pair (allows scripting in tests)
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Execute `code` against `tests`; never fails, infrastructure problems
    /// are reported as a failing result
    async fn run(&self, code: &str, tests: &str, language: &Language) -> SandboxResult;
}

/// Local-process sandbox
#[derive(Debug, Clone)]
pub struct SandboxRunner {
    timeout: Duration,
    output_limit: usize,
    scratch_dir: Option<PathBuf>,
}

impl Default for SandboxRunner {
    fn default() -> Self {
        Self::from_config(&SandboxConfig::default())
    }
}

impl SandboxRunner {
    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            output_limit: config.output_limit_bytes,
            scratch_dir: config.scratch_dir.clone(),
        }
    }

    /// Override the wall-clock limit
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the output cap
    pub fn with_output_limit(mut self, bytes: usize) -> Self {
        self.output_limit = bytes;
        self
    }

    /// Create working directories under `dir` instead of the system temp dir
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    fn allocate(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(WORKDIR_PREFIX);
        let dir = match &self.scratch_dir {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        };
        dir.map_err(|e| DuetError::Sandbox(format!("failed to allocate working area: {}", e)))
    }

    /// Run inside a fresh working directory.
    ///
    /// The `TempDir` guard removes the directory on every exit path, including
    /// early returns and the future being dropped mid-run.
    async fn try_run(&self, code: &str, tests: &str, language: &Language) -> Result<SandboxResult> {
        let workdir = self.allocate()?;
        let strategy = Strategy::for_language(language);
        let steps = strategy.materialize(workdir.path(), code, tests)?;
        debug!(?strategy, dir = %workdir.path().display(), "materialized program");

        let deadline = Instant::now() + self.timeout;
        let mut transcript = String::new();
        let mut clean_exit = true;
        let mut forced_failure = false;

        for step in &steps {
            let remaining_time = deadline.saturating_duration_since(Instant::now());
            let remaining_output = self.output_limit.saturating_sub(transcript.len());

            let mut cmd = Command::new(&step.program);
            cmd.args(&step.args).current_dir(workdir.path());
            let out = run_limited(cmd, remaining_time, remaining_output).await?;
            transcript.push_str(&out.output);

            let notice = match out.termination {
                Termination::TimedOut => Some(format!(
                    "[sandbox] timed out after {}s",
                    self.timeout.as_secs()
                )),
                Termination::OutputLimit => Some(format!(
                    "[sandbox] output exceeded {} bytes",
                    self.output_limit
                )),
                Termination::Exited { .. } if out.bytes_seen > remaining_output => Some(format!(
                    "[sandbox] output exceeded {} bytes",
                    self.output_limit
                )),
                Termination::Exited { .. } => None,
            };

            if let Some(notice) = notice {
                warn!("{}", notice);
                if !transcript.ends_with('\n') && !transcript.is_empty() {
                    transcript.push('\n');
                }
                transcript.push_str(&notice);
                forced_failure = true;
                break;
            }

            if !out.success() {
                clean_exit = false;
                break;
            }
        }

        let (passed, mut failed) = classify(&transcript, clean_exit && !forced_failure).counts();
        if forced_failure {
            failed = failed.max(1);
        }

        if let Err(e) = workdir.close() {
            warn!(err = %e, "failed to remove sandbox working area");
        }

        Ok(SandboxResult::from_counts(passed, failed, transcript))
    }
}

#[async_trait]
impl Sandbox for SandboxRunner {
    #[instrument(skip(self, code, tests), fields(language = %language))]
    async fn run(&self, code: &str, tests: &str, language: &Language) -> SandboxResult {
        match self.try_run(code, tests, language).await {
            Ok(result) => {
                info!(
                    "Sandbox: {} passed, {} failed of {}",
                    result.passed, result.failed, result.total
                );
                result
            }
            Err(e) => {
                warn!("Sandbox infrastructure failure: {}", e);
                SandboxResult::infrastructure_failure(e.to_string())
            }
        }
    }
}
