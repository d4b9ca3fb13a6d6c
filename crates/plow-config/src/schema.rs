// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub plan: PlanConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the plan-generation service.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Environment variable holding the API key. Unset means no auth header
    /// is sent (local development server).
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { base_url: default_base_url(), api_key_env: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Minimum milliseconds between submitting a prompt and revealing the
    /// streamed reply, so a fast response does not flash the screen.
    #[serde(default = "default_reveal_delay_ms")]
    pub reveal_delay_ms: u64,
    /// Fixed redraw period for the reply view while it streams.
    #[serde(default = "default_render_interval_ms")]
    pub render_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reveal_delay_ms: default_reveal_delay_ms(),
            render_interval_ms: default_render_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanConfig {
    /// Directory holding `plan.json` and the conversation log.
    /// Defaults to `.plow` in the working directory.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_base_url() -> String {
    "http://localhost:9099".to_string()
}

fn default_reveal_delay_ms() -> u64 {
    700
}

fn default_render_interval_ms() -> u64 {
    100
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert!(cfg.server.base_url.starts_with("http"));
        assert_eq!(cfg.session.reveal_delay_ms, 700);
        assert_eq!(cfg.session.render_interval_ms, 100);
        assert!(cfg.plan.dir.is_none());
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let cfg: Config = toml::from_str(
            r#"[server]
base_url = "https://plans.example.com""#,
        )
        .unwrap();
        assert_eq!(cfg.server.base_url, "https://plans.example.com");
        assert_eq!(cfg.session.reveal_delay_ms, 700);
    }

    #[test]
    fn empty_toml_is_full_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.server.base_url, Config::default().server.base_url);
    }
}
