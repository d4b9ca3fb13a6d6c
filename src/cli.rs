// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "plow",
    about = "A terminal client for a streaming plan-generation service",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to config file (overrides auto-discovery)
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Plan directory (overrides config; default .plow/plan)
    #[arg(long, global = true, value_name = "DIR")]
    pub plan_dir: Option<PathBuf>,

    /// Increase log verbosity (-v: debug, -vv: trace); logs go to stderr
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send a prompt and stream the proposal.
    /// While streaming: s / Esc / Ctrl-C stop the proposal.
    Tell {
        /// The prompt text
        #[arg(value_name = "PROMPT", required = true)]
        prompt: Vec<String>,
    },
    /// Copy the proposal's built files into the working tree
    Apply,
    /// Show diffs between the built files and the working tree
    Diffs,
    /// Print the proposal's built files
    Preview,
    /// Abort the current proposal on the server and discard its built files
    Abort,
    /// Print the effective configuration and exit
    ShowConfig,
    /// Generate shell completion script
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "plow", &mut std::io::stdout());
}
