use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Config;

/// One place a config file may live. Search locations are optional; a
/// layer named explicitly on the command line must exist.
#[derive(Debug, Clone)]
struct Layer {
    path: PathBuf,
    required: bool,
}

/// Every layer that feeds the effective config, lowest precedence first.
/// The explicit `--config` path, when given, sits on top of the stack.
fn layers(explicit: Option<&Path>) -> Vec<Layer> {
    let search = |path: PathBuf| Layer { path, required: false };

    let mut layers = vec![search(PathBuf::from("/etc/plow/config.toml"))];
    if let Some(home) = dirs::home_dir() {
        layers.push(search(home.join(".config/plow/config.toml")));
    }
    if let Some(cfg) = dirs::config_dir() {
        layers.push(search(cfg.join("plow/config.toml")));
    }
    // Workspace-local files override the user-level ones.
    layers.push(search(PathBuf::from(".plow/config.toml")));
    layers.push(search(PathBuf::from("plow.toml")));
    if let Some(path) = explicit {
        layers.push(Layer { path: path.to_path_buf(), required: true });
    }
    layers
}

fn read_layer(path: &Path) -> anyhow::Result<toml::Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Build the effective [`Config`] by deep-merging every layer in
/// precedence order. `explicit` is the `--config` path; unlike the search
/// locations, a missing explicit file is an error.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged = toml::Value::Table(toml::map::Map::new());
    for layer in layers(explicit) {
        if !layer.path.is_file() {
            if layer.required {
                anyhow::bail!("config file not found: {}", layer.path.display());
            }
            continue;
        }
        debug!(path = %layer.path.display(), "merging config layer");
        merge(&mut merged, read_layer(&layer.path)?);
    }
    merged.try_into().context("invalid configuration")
}

/// Recursive table merge; on anything other than two tables the higher
/// layer replaces the lower one wholesale.
fn merge(base: &mut toml::Value, over: toml::Value) {
    match (base, over) {
        (toml::Value::Table(base), toml::Value::Table(over)) => {
            for (key, value) in over {
                match base.get_mut(&key) {
                    Some(slot) => merge(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, over) => *base = over,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
