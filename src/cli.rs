// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use std::path::PathBuf;

/// Thinking-level override accepted on the command line, mapped onto
/// `kestrel_config::ThinkingLevel` rather than re-exporting it directly so
/// clap's derive doesn't need that crate to implement `ValueEnum`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ThinkingLevelArg {
    #[default]
    Off,
    Low,
    Medium,
    High,
}

#[derive(Parser, Debug)]
#[command(
    name = "kestrel",
    about = "Runtime for a multi-session, multi-turn coding agent",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Prompt to send to a fresh (or resumed) session and run to completion.
    #[arg(value_name = "PROMPT")]
    pub prompt: Option<String>,

    /// Path to config file (overrides auto-discovery).
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Session log file to load from and save to. Omit to run a throwaway
    /// in-memory session.
    #[arg(long, short = 'f')]
    pub session_file: Option<PathBuf>,

    /// Working directory recorded on the session header.
    #[arg(long, default_value = ".")]
    pub cwd: PathBuf,

    /// Starting thinking level for the session (overrides config).
    #[arg(long, value_enum)]
    pub thinking_level: Option<ThinkingLevelArg>,

    /// Increase verbosity (-v = debug, -vv = trace).
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the effective configuration and exit.
    ShowConfig,
    /// Generate a shell completion script.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "kestrel", &mut std::io::stdout());
}
