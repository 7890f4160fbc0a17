// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::{self, IsTerminal, Read};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands, ThinkingLevelArg};
use kestrel_config::{Config, ThinkingLevel};
use kestrel_core::{SessionDeps, SessionEvent, SessionHealth, SessionOptions, SessionSupervisor};
use kestrel_procman::ProcessManager;
use kestrel_rungraph::RunGraph;
use kestrel_tools::{BashTool, ToolDispatcher, ToolRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Some(cmd) = &cli.command {
        return match cmd {
            Commands::ShowConfig => show_config(cli.config.as_deref()),
            Commands::Completions { shell } => {
                cli::print_completions(*shell);
                Ok(())
            }
        };
    }

    let config = kestrel_config::load(cli.config.as_deref())?;
    run_session(cli, config).await
}

fn show_config(path: Option<&std::path::Path>) -> anyhow::Result<()> {
    let config = kestrel_config::load(path)?;
    println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
    Ok(())
}

/// Assemble `SessionDeps` and drive exactly one session through one turn.
///
/// Subagent dispatch (the `task` tool) is deliberately left out of this demo
/// wiring: `TaskTool` needs a `Coordinator`, which needs a
/// `SessionSupervisor`, which needs the very `SessionDeps` being built here —
/// an embedder that wants subagents breaks the cycle with a `OnceLock`-backed
/// launcher and registers `TaskTool` against that. The library supports it;
/// this binary just doesn't exercise it.
async fn run_session(cli: Cli, config: Config) -> anyhow::Result<()> {
    let model: Arc<dyn kestrel_model::ModelProvider> = Arc::from(kestrel_model::from_config(&config.model)?);

    let mut registry = ToolRegistry::new();
    let procman = ProcessManager::new(config.process.clone());
    registry.register(BashTool::new(procman, config.tools.timeout_secs));

    let dispatcher = Arc::new(ToolDispatcher::new(registry, &config.tools, None));
    let run_graph = RunGraph::new();

    let mut agent_config = config.agent.clone();
    if let Some(level) = cli.thinking_level {
        agent_config.default_thinking_level = map_thinking_level(level);
    }

    let deps = SessionDeps { model, dispatcher, run_graph, agent_config };
    let supervisor = SessionSupervisor::new(deps);

    let cwd = cli.cwd.to_string_lossy().into_owned();
    let handle = supervisor
        .start_session(SessionOptions { cwd, parent_session: None, session_file: cli.session_file.clone() })
        .await;

    let _subscription = handle
        .subscribe_callback(|event| print_event(&event))
        .await
        .context("subscribing to session events")?;

    let prompt = resolve_prompt(cli.prompt)?;
    if prompt.trim().is_empty() {
        anyhow::bail!("no prompt given (pass one as an argument or pipe it on stdin)");
    }

    handle.prompt(prompt).await.context("running turn")?;
    handle.save().await.context("saving session")?;

    let health: SessionHealth = supervisor
        .health_all()
        .await
        .into_iter()
        .find(|h| h.id == handle.id())
        .context("session vanished from the supervisor after its own turn")?;
    tracing::debug!(session_id = %health.id, alive = health.alive, "turn complete");

    handle.shutdown().await.context("shutting down session")?;
    Ok(())
}

fn map_thinking_level(level: ThinkingLevelArg) -> ThinkingLevel {
    match level {
        ThinkingLevelArg::Off => ThinkingLevel::Off,
        ThinkingLevelArg::Low => ThinkingLevel::Low,
        ThinkingLevelArg::Medium => ThinkingLevel::Medium,
        ThinkingLevelArg::High => ThinkingLevel::High,
    }
}

/// Use the CLI-supplied prompt if given, otherwise read stdin when it is
/// piped (never block on an interactive terminal with nothing queued up).
fn resolve_prompt(arg: Option<String>) -> anyhow::Result<String> {
    if let Some(p) = arg {
        return Ok(p);
    }
    if io::stdin().is_terminal() {
        return Ok(String::new());
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf).context("reading stdin")?;
    Ok(buf)
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::MessageUpdate { delta: kestrel_core::MessageDelta::TextDelta { text, .. }, .. } => {
            print!("{text}");
            let _ = io::Write::flush(&mut io::stdout());
        }
        SessionEvent::ToolStart { name, .. } => eprintln!("\n[tool] {name} running..."),
        SessionEvent::ToolEnd { name, result, .. } => match result {
            Ok(_) => eprintln!("[tool] {name} done"),
            Err(reason) => eprintln!("[tool] {name} failed: {reason}"),
        },
        SessionEvent::Notify { text, level } => eprintln!("[{level:?}] {text}"),
        SessionEvent::Error { reason, .. } => eprintln!("\n[error] {reason}"),
        SessionEvent::MessageEnd { .. } => println!(),
        _ => {}
    }
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
