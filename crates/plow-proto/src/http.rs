// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! HTTP transport: newline-delimited JSON chunks over a streaming response.

use anyhow::{bail, Context};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, trace};

use crate::{ChunkStream, PlanTransport, RequestMetadata, StreamChunk};

/// Header carrying the server-side prompt token count on the propose response.
const PROMPT_TOKENS_HEADER: &str = "x-prompt-tokens";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProposeBody<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_proposal_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    root_id: Option<&'a str>,
}

/// Talks to the plan service over HTTP. The propose endpoint answers with a
/// long-lived NDJSON body, one [`StreamChunk`] per line.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.request(method, format!("{}{path}", self.base_url));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        req
    }
}

#[async_trait]
impl PlanTransport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn propose(
        &self,
        prompt: &str,
        parent_id: Option<&str>,
        root_id: Option<&str>,
    ) -> anyhow::Result<(RequestMetadata, ChunkStream)> {
        let body = ProposeBody { prompt, parent_proposal_id: parent_id, root_id };
        debug!(
            base_url = %self.base_url,
            prompt_len = prompt.len(),
            parent = parent_id.unwrap_or("-"),
            "sending proposal request"
        );
        let resp = self
            .request(reqwest::Method::POST, "/proposals")
            .json(&body)
            .send()
            .await
            .context("propose request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("plan service error {status}: {text}");
        }

        let prompt_token_count = resp
            .headers()
            .get(PROMPT_TOKENS_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let meta = RequestMetadata { prompt_token_count };

        // A chunk line can be split across TCP packets. Maintain a line
        // buffer across reads; emit chunks only for complete lines.
        let byte_stream = resp.bytes_stream();
        let chunk_stream = byte_stream
            .scan(String::new(), |buf, read| {
                let items: Vec<anyhow::Result<StreamChunk>> = match read {
                    Ok(bytes) => {
                        buf.push_str(&String::from_utf8_lossy(&bytes));
                        drain_complete_lines(buf)
                    }
                    Err(e) => vec![Err(anyhow::anyhow!(e))],
                };
                std::future::ready(Some(items))
            })
            .flat_map(futures::stream::iter);

        Ok((meta, Box::pin(chunk_stream)))
    }

    async fn abort(&self, proposal_id: &str) -> anyhow::Result<()> {
        let resp = self
            .request(reqwest::Method::DELETE, &format!("/proposals/{proposal_id}"))
            .send()
            .await
            .context("abort request failed")?;
        if !resp.status().is_success() {
            bail!("abort failed with status {}", resp.status());
        }
        Ok(())
    }
}

/// Drain all complete `\n`-terminated lines from `buf`, leaving any trailing
/// partial line in place for the next read to extend.
fn drain_complete_lines(buf: &mut String) -> Vec<anyhow::Result<StreamChunk>> {
    let mut items = Vec::new();
    while let Some(nl_pos) = buf.find('\n') {
        let line = buf[..nl_pos].trim_end_matches('\r').to_string();
        *buf = buf[nl_pos + 1..].to_string();
        if line.is_empty() {
            continue;
        }
        trace!(line_len = line.len(), "stream line complete");
        items.push(
            serde_json::from_str::<StreamChunk>(&line)
                .with_context(|| format!("malformed stream chunk line: {line}")),
        );
    }
    items
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
