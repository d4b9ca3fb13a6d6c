// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use similar::{ChangeTag, TextDiff};
use tokio::sync::{watch, Mutex};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use plow_config::Config;
use plow_core::{Key, KeyCommands, KeyOutcome, SessionDriver, SessionOptions, SessionOutcome};
use plow_proto::{HttpTransport, PlanTransport};
use plow_state::{ConversationFile, PlanDir};
use plow_term::{screen::RawModeGuard, spawn_key_listener, TerminalScreen};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    if let Commands::Completions { shell } = &cli.command {
        cli::print_completions(*shell);
        return Ok(());
    }

    let config = plow_config::load(cli.config.as_deref())?;
    let plan_dir = PlanDir::discover(
        cli.plan_dir.as_deref().or(config.plan.dir.as_deref()),
    );

    match cli.command {
        Commands::Tell { prompt } => run_tell(&config, plan_dir, prompt.join(" ")).await,
        Commands::Apply => apply_cmd(&plan_dir),
        Commands::Diffs => diffs_cmd(&plan_dir),
        Commands::Preview => preview_cmd(&plan_dir),
        Commands::Abort => abort_cmd(&config, &plan_dir).await,
        Commands::ShowConfig => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Completions { .. } => unreachable!("handled above"),
    }
}

fn transport(config: &Config) -> anyhow::Result<HttpTransport> {
    let api_key = match &config.server.api_key_env {
        Some(var) => Some(
            std::env::var(var).with_context(|| format!("reading API key from ${var}"))?,
        ),
        None => None,
    };
    Ok(HttpTransport::new(&config.server.base_url, api_key))
}

/// The streaming hotkeys: s, Esc, and Ctrl-C stop the proposal, telling the
/// server first so it stops burning tokens.
struct Hotkeys {
    transport: Arc<dyn PlanTransport>,
}

#[async_trait]
impl KeyCommands for Hotkeys {
    async fn dispatch(
        &mut self,
        key: Key,
        proposal_id: Option<&str>,
    ) -> anyhow::Result<KeyOutcome> {
        match key {
            Key::Char('s') | Key::Esc | Key::CtrlC => {
                if let Some(id) = proposal_id {
                    self.transport.abort(id).await?;
                }
                Ok(KeyOutcome::Stop)
            }
            _ => Ok(KeyOutcome::Continue),
        }
    }
}

async fn run_tell(config: &Config, plan_dir: PlanDir, prompt: String) -> anyhow::Result<()> {
    let transport: Arc<dyn PlanTransport> = Arc::new(transport(config)?);
    let log = ConversationFile::new(plan_dir.conversation_path());
    let view = Arc::new(Mutex::new(TerminalScreen::new()));
    let options = SessionOptions {
        reveal_delay: Duration::from_millis(config.session.reveal_delay_ms),
        render_interval: Duration::from_millis(config.session.render_interval_ms),
    };

    let _raw = RawModeGuard::enable()?;
    let (keys_cancel_tx, keys_cancel_rx) = watch::channel(false);
    let keys = spawn_key_listener(keys_cancel_rx);

    let driver = SessionDriver::new(
        Arc::clone(&transport),
        plan_dir,
        log,
        view,
        Hotkeys { transport },
        options,
    );
    let outcome = driver.run(prompt, keys).await;
    let _ = keys_cancel_tx.send(true);
    drop(_raw);

    match outcome? {
        SessionOutcome::Completed(_) => Ok(()),
        SessionOutcome::Cancelled => {
            println!("proposal stopped");
            Ok(())
        }
    }
}

fn apply_cmd(plan_dir: &PlanDir) -> anyhow::Result<()> {
    let files = plan_dir.list_built_files()?;
    if files.is_empty() {
        println!("no built files to apply");
        return Ok(());
    }
    for file in &files {
        let dest = Path::new(&file.path);
        if let Some(parent) = dest.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        fs::write(dest, &file.content)
            .with_context(|| format!("writing {}", dest.display()))?;
        println!("applied {}", file.path);
    }
    println!("{} file(s) applied", files.len());
    Ok(())
}

fn diffs_cmd(plan_dir: &PlanDir) -> anyhow::Result<()> {
    let files = plan_dir.list_built_files()?;
    if files.is_empty() {
        println!("no built files to diff");
        return Ok(());
    }
    for file in &files {
        let current = fs::read_to_string(&file.path).unwrap_or_default();
        if current == file.content {
            continue;
        }
        println!("--- {}", file.path);
        println!("+++ {} (proposed)", file.path);
        let diff = TextDiff::from_lines(&current, &file.content);
        for change in diff.iter_all_changes() {
            let sign = match change.tag() {
                ChangeTag::Delete => "-",
                ChangeTag::Insert => "+",
                ChangeTag::Equal => " ",
            };
            print!("{sign}{change}");
        }
        println!();
    }
    Ok(())
}

fn preview_cmd(plan_dir: &PlanDir) -> anyhow::Result<()> {
    let files = plan_dir.list_built_files()?;
    if files.is_empty() {
        println!("no built files yet");
        return Ok(());
    }
    for file in &files {
        println!("── {} {}", file.path, "─".repeat(60usize.saturating_sub(file.path.len())));
        println!("{}", file.content);
    }
    Ok(())
}

async fn abort_cmd(config: &Config, plan_dir: &PlanDir) -> anyhow::Result<()> {
    use plow_core::PlanStore;

    let state = plan_dir.load()?;
    if state.proposal_id.is_empty() {
        println!("no proposal to abort");
        return Ok(());
    }
    let transport = transport(config)?;
    transport.abort(&state.proposal_id).await?;
    plan_dir.discard_built_files()?;
    println!("aborted proposal {}", state.proposal_id);
    Ok(())
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}
