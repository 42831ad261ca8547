//! Retrieval-augmented reply generation.
//!
//! [`ReplyGenerator`] is the seam between a chat session and whatever
//! produces answers for general questions:
//!
//! - [`RagPipeline`] runs in-process: embed the query, match snippets,
//!   build a prompt, call the completion API.
//! - [`RemoteRagClient`] forwards to a running server's `POST /rag-chat`.

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

use crate::completion;
use crate::config::Config;
use crate::embedding;
use crate::models::{HistoryTurn, RagReply};
use crate::retrieval;

#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    /// Produce a reply to `message` given prior `history` (oldest first).
    async fn reply(&self, message: &str, history: &[HistoryTurn]) -> Result<RagReply>;
}

/// Keep only the last `max_turns` entries of `history`.
pub fn trim_history(history: &[HistoryTurn], max_turns: usize) -> &[HistoryTurn] {
    let start = history.len().saturating_sub(max_turns);
    &history[start..]
}

pub struct RagPipeline {
    pool: SqlitePool,
    config: Arc<Config>,
}

impl RagPipeline {
    pub fn new(pool: SqlitePool, config: Arc<Config>) -> Self {
        Self { pool, config }
    }
}

#[async_trait]
impl ReplyGenerator for RagPipeline {
    async fn reply(&self, message: &str, history: &[HistoryTurn]) -> Result<RagReply> {
        if message.trim().is_empty() {
            bail!("message must not be empty");
        }

        let history = trim_history(history, self.config.retrieval.history_turns);

        let sources = if self.config.embedding.is_enabled() {
            let query_vec = embedding::embed_query(&self.config.embedding, message).await?;
            retrieval::match_snippets(
                &self.pool,
                &query_vec,
                self.config.retrieval.match_threshold,
                self.config.retrieval.match_count,
            )
            .await?
        } else {
            tracing::debug!("embeddings disabled; answering without retrieval");
            Vec::new()
        };

        let context = retrieval::build_context(&sources);
        let messages =
            completion::build_messages(&self.config.chat.system_prompt, &context, history, message);
        let reply = completion::complete(&self.config.chat, &messages).await?;

        tracing::info!(matched = sources.len(), "generated reply");
        Ok(RagReply { reply, sources })
    }
}

/// Calls `POST {endpoint}/rag-chat` on a running server.
pub struct RemoteRagClient {
    endpoint: String,
    client: reqwest::Client,
}

impl RemoteRagClient {
    pub fn new(endpoint: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl ReplyGenerator for RemoteRagClient {
    async fn reply(&self, message: &str, history: &[HistoryTurn]) -> Result<RagReply> {
        let response = self
            .client
            .post(format!("{}/rag-chat", self.endpoint))
            .json(&serde_json::json!({ "message": message, "history": history }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("rag-chat returned {}: {}", status, body_text);
        }

        Ok(response.json::<RagReply>().await?)
    }
}
