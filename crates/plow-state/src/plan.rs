// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
/// The plan directory.
///
/// One directory per plan:
///
///   `<plan-dir>/plan.json`      — proposal chain state ([`PlanState`])
///   `<plan-dir>/files/<path>`   — the latest built version of each file
///   `<plan-dir>/conversation.md`
///
/// Defaults to `.plow/plan` under the working directory so the plan travels
/// with the project it describes.
use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use plow_core::{PlanState, PlanStore};
use plow_proto::BuiltFile;

#[derive(Debug, Clone)]
pub struct PlanDir {
    root: PathBuf,
}

impl PlanDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The configured plan directory, or `.plow/plan` in the working
    /// directory when none is configured.
    pub fn discover(configured: Option<&Path>) -> Self {
        match configured {
            Some(p) => Self::new(p),
            None => Self::new(Path::new(".plow").join("plan")),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn conversation_path(&self) -> PathBuf {
        self.root.join("conversation.md")
    }

    fn plan_file(&self) -> PathBuf {
        self.root.join("plan.json")
    }

    fn files_dir(&self) -> PathBuf {
        self.root.join("files")
    }

    /// Every built file currently in the plan, as (relative path, content),
    /// sorted by path.
    pub fn list_built_files(&self) -> Result<Vec<BuiltFile>> {
        let mut out = Vec::new();
        let dir = self.files_dir();
        if dir.exists() {
            collect_files(&dir, &dir, &mut out)?;
        }
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    /// Drop all built files, e.g. after aborting a proposal.
    pub fn discard_built_files(&self) -> Result<()> {
        let dir = self.files_dir();
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .with_context(|| format!("removing {}", dir.display()))?;
        }
        Ok(())
    }

    /// Resolve a built file's relative path under `files/`, rejecting
    /// anything that would escape the plan directory.
    fn built_path(&self, rel: &str) -> Result<PathBuf> {
        let rel_path = Path::new(rel);
        let escapes = rel_path.components().any(|c| {
            matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_))
        });
        if escapes || rel.is_empty() {
            anyhow::bail!("refusing to write outside the plan directory: {rel}");
        }
        Ok(self.files_dir().join(rel_path))
    }
}

fn collect_files(base: &Path, dir: &Path, out: &mut Vec<BuiltFile>) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(base, &path, out)?;
        } else {
            let rel = path
                .strip_prefix(base)
                .unwrap_or(&path)
                .to_string_lossy()
                .to_string();
            let content = fs::read_to_string(&path)
                .with_context(|| format!("reading built file {}", path.display()))?;
            out.push(BuiltFile { path: rel, content });
        }
    }
    Ok(())
}

impl PlanStore for PlanDir {
    /// Missing plan.json means a fresh plan, not an error.
    fn load(&self) -> Result<PlanState> {
        let path = self.plan_file();
        if !path.exists() {
            return Ok(PlanState::default());
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("reading plan state {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing plan state {}", path.display()))
    }

    fn save(&self, state: &PlanState, timestamp: &str) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("creating plan directory {}", self.root.display()))?;
        let mut stamped = state.clone();
        stamped.updated_at = timestamp.to_string();
        let path = self.plan_file();
        let json = serde_json::to_string_pretty(&stamped)?;
        fs::write(&path, json)
            .with_context(|| format!("writing plan state {}", path.display()))?;
        debug!(path = %path.display(), proposal_id = %stamped.proposal_id, "plan state saved");
        Ok(())
    }

    fn save_built_file(&self, file: &BuiltFile) -> Result<()> {
        let path = self.built_path(&file.path)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        fs::write(&path, &file.content)
            .with_context(|| format!("writing built file {}", path.display()))?;
        debug!(path = %path.display(), "built file saved");
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
