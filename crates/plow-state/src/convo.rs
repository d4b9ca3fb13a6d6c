/// Append-only conversation log.
///
/// Each proposal appends one turn to `conversation.md` in the plan
/// directory:
///
///   `## User · <timestamp> · <turn-id>`
///   prompt text
///
///   `## Assistant · <responseTimestamp>`
///   reply text
///
/// Turns get a v4 UUID so external tooling can reference them even when two
/// turns share a timestamp.
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use uuid::Uuid;

use plow_core::{AppendConversationParams, ConversationLog};

#[derive(Debug, Clone)]
pub struct ConversationFile {
    path: PathBuf,
}

impl ConversationFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn render_turn(params: &AppendConversationParams, turn_id: &Uuid) -> String {
        format!(
            "## User · {} · {}\n\n{}\n\n*{} tokens*\n\n## Assistant · {}\n\n{}\n\n*{} tokens*\n\n",
            params.timestamp,
            turn_id,
            params.prompt.trim_end(),
            params.prompt_tokens,
            params.response_timestamp,
            params.reply.trim_end(),
            params.reply_tokens,
        )
    }
}

impl ConversationLog for ConversationFile {
    fn append(&self, params: &AppendConversationParams) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let turn = Self::render_turn(params, &Uuid::new_v4());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening conversation log {}", self.path.display()))?;
        file.write_all(turn.as_bytes())
            .with_context(|| format!("appending to {}", self.path.display()))?;
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn params(prompt: &str, reply: &str) -> AppendConversationParams {
        AppendConversationParams {
            timestamp: "2026-02-20T10:00:00.000Z".into(),
            response_timestamp: "2026-02-20T10:00:05.000Z".into(),
            prompt: prompt.into(),
            prompt_tokens: 3,
            reply: reply.into(),
            reply_tokens: 7,
        }
    }

    #[test]
    fn append_creates_the_file_and_its_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan").join("conversation.md");
        let log = ConversationFile::new(&path);
        log.append(&params("hello", "world")).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("## User · 2026-02-20T10:00:00.000Z"));
        assert!(content.contains("hello"));
        assert!(content.contains("## Assistant · 2026-02-20T10:00:05.000Z"));
        assert!(content.contains("world"));
    }

    #[test]
    fn repeated_appends_accumulate_turns_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conversation.md");
        let log = ConversationFile::new(&path);
        log.append(&params("first prompt", "first reply")).unwrap();
        log.append(&params("second prompt", "second reply")).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches("## User").count(), 2);
        let first = content.find("first prompt").unwrap();
        let second = content.find("second prompt").unwrap();
        assert!(first < second);
    }

    #[test]
    fn token_counts_are_recorded_per_turn() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conversation.md");
        ConversationFile::new(&path).append(&params("p", "r")).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("*3 tokens*"));
        assert!(content.contains("*7 tokens*"));
    }
}
