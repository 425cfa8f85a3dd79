//! duet CLI - planner/implementer TDD loop
//!
//! Usage:
//!   duet init                              Write .duet/config.toml
//!   duet run <task>                        Run the loop, streaming events as NDJSON
//!   duet serve                             Start the HTTP/SSE server
//!   duet sandbox <code> <tests> -l <lang>  Run one sandbox check

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use duet_agent::ModelClient;
use duet_core::{DuetConfig, Language, RoleModels, Task};
use duet_orchestrator::{EventPublisher, Orchestrator, RunOutcome};
use duet_sandbox::{Sandbox, SandboxRunner};
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "duet")]
#[command(author, version, about = "Planner/implementer TDD orchestration")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory holding .duet/config.toml
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init,

    /// Run one task through the loop
    Run {
        /// What to build
        task: String,

        /// Planner model id (overrides config)
        #[arg(long)]
        planner_model: Option<String>,

        /// Implementer model id (overrides config)
        #[arg(long)]
        implementer_model: Option<String>,
    },

    /// Serve runs over HTTP with SSE progress
    Serve {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run a code/test pair through the sandbox once
    Sandbox {
        /// File holding the implementation
        code: PathBuf,

        /// File holding the tests
        tests: PathBuf,

        /// Implementation language
        #[arg(short, long, default_value = "python")]
        language: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the event stream
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose { "debug" } else { "info" })
    });
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();

    match cli.command {
        Commands::Init => cmd_init(&cli.root),
        Commands::Run {
            task,
            planner_model,
            implementer_model,
        } => cmd_run(&cli.root, task, planner_model, implementer_model).await,
        Commands::Serve { port } => cmd_serve(&cli.root, port).await,
        Commands::Sandbox {
            code,
            tests,
            language,
        } => cmd_sandbox(&cli.root, code, tests, language).await,
    }
}

fn load_config(root: &Path) -> Result<DuetConfig> {
    DuetConfig::load_or_default(root)
        .with_context(|| format!("Failed to load {}", DuetConfig::path(root).display()))
}

fn cmd_init(root: &Path) -> Result<()> {
    let path = DuetConfig::path(root);
    if path.exists() {
        println!("Config already exists at {}", path.display());
        return Ok(());
    }

    let path = DuetConfig::write_default(root)
        .with_context(|| format!("Failed to write config under {}", root.display()))?;
    println!("Initialized duet in {}", root.display());
    println!("Created:");
    println!("  {}", path.display());
    Ok(())
}

async fn cmd_run(
    root: &Path,
    task: String,
    planner_model: Option<String>,
    implementer_model: Option<String>,
) -> Result<()> {
    if task.trim().is_empty() {
        bail!("Task must not be empty");
    }

    let config = load_config(root)?;
    let models = RoleModels::new(
        planner_model.unwrap_or_else(|| config.models.planner.clone()),
        implementer_model.unwrap_or_else(|| config.models.implementer.clone()),
    );
    info!(planner = %models.planner, implementer = %models.implementer, "Starting run");

    let client = ModelClient::from_config(&config.models).context("Failed to build model client")?;
    let orchestrator = Orchestrator::new(client, SandboxRunner::from_config(&config.sandbox))
        .with_max_tokens(config.models.max_tokens);

    let (publisher, mut events) = EventPublisher::channel(config.server.event_buffer);
    let printer = tokio::spawn(async move {
        let stdout = std::io::stdout();
        while let Some(event) = events.recv().await {
            let line = serde_json::to_string(&event)?;
            let mut out = stdout.lock();
            writeln!(out, "{}", line)?;
            out.flush()?;
        }
        println!("[DONE]");
        anyhow::Ok(())
    });

    let run = orchestrator.run(Task::new(task.trim()), models, &publisher);
    // Dropping the run on Ctrl+C kills any sandbox child and abandons the request
    let report = tokio::select! {
        report = run => Some(report),
        _ = tokio::signal::ctrl_c() => None,
    };
    drop(publisher);
    printer.await??;

    let Some(report) = report else {
        warn!("Interrupted");
        bail!("Run interrupted");
    };
    info!(outcome = %report.outcome, rounds = report.rounds, "Run finished");
    if report.outcome == RunOutcome::Aborted {
        bail!(
            "Run aborted: {}",
            report.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }
    Ok(())
}

async fn cmd_serve(root: &Path, port: Option<u16>) -> Result<()> {
    let config = load_config(root)?;
    let port = port.unwrap_or(config.server.port);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    println!("duet server running at http://localhost:{}", port);
    println!("Press Ctrl+C to stop");
    duet_server::serve(config, addr).await
}

async fn cmd_sandbox(root: &Path, code: PathBuf, tests: PathBuf, language: String) -> Result<()> {
    let config = load_config(root)?;
    let code = tokio::fs::read_to_string(&code)
        .await
        .with_context(|| format!("Failed to read {}", code.display()))?;
    let tests = tokio::fs::read_to_string(&tests)
        .await
        .with_context(|| format!("Failed to read {}", tests.display()))?;

    let result = SandboxRunner::from_config(&config.sandbox)
        .run(&code, &tests, &Language::new(&language))
        .await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.is_pass() {
        bail!("{} of {} tests failed", result.failed, result.total);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_overrides_parse() {
        let cli = Cli::parse_from([
            "duet",
            "run",
            "reverse a string",
            "--planner-model",
            "a/p",
            "-v",
        ]);
        assert!(cli.verbose);
        match cli.command {
            Commands::Run {
                task,
                planner_model,
                implementer_model,
            } => {
                assert_eq!(task, "reverse a string");
                assert_eq!(planner_model.as_deref(), Some("a/p"));
                assert!(implementer_model.is_none());
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_sandbox_language_default() {
        let cli = Cli::parse_from(["duet", "sandbox", "code.py", "tests.py"]);
        match cli.command {
            Commands::Sandbox { language, .. } => assert_eq!(language, "python"),
            _ => panic!("expected sandbox"),
        }
    }

    #[test]
    fn test_init_writes_config_once() {
        let dir = tempfile::TempDir::new().unwrap();
        cmd_init(dir.path()).unwrap();
        assert!(DuetConfig::path(dir.path()).exists());
        // Second init keeps the existing file
        cmd_init(dir.path()).unwrap();
        assert!(load_config(dir.path()).is_ok());
    }
}
