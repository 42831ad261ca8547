//! Embedding provider abstraction and vector utilities.
//!
//! Providers:
//! - **`disabled`**: every call fails; retrieval is skipped by callers.
//! - **`openai`**: `POST {url}/embeddings` (OpenAI-compatible, bearer auth).
//! - **`ollama`**: `POST {url}/api/embed` on a local Ollama instance.
//!
//! Batch embedding for ingestion retries transient failures (HTTP 429, 5xx,
//! network errors) with exponential backoff: 1s, 2s, 4s, ... capped at 32s.
//! Query embedding for a chat turn makes exactly one attempt.

use anyhow::{anyhow, bail, Result};
use std::time::Duration;

use crate::config::{resolve_api_key, EmbeddingConfig};

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// Metadata about the configured embedding model.
pub trait EmbeddingProvider: Send + Sync {
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;
}

pub struct DisabledProvider;

impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
}

/// A remote provider (`openai` or `ollama`) described by model and dims.
pub struct RemoteProvider {
    model: String,
    dims: usize,
}

impl RemoteProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            anyhow!(
                "embedding.model required for {} provider",
                config.provider
            )
        })?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for {} provider", config.provider))?;
        Ok(Self { model, dims })
    }
}

impl EmbeddingProvider for RemoteProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "openai" | "ollama" => Ok(Box::new(RemoteProvider::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Embed a batch of texts, retrying transient failures up to `max_retries` times.
///
/// Returns one vector per input, in input order.
pub async fn embed_texts(
    config: &EmbeddingConfig,
    texts: &[String],
    max_retries: u32,
) -> Result<Vec<Vec<f32>>> {
    let model = match config.provider.as_str() {
        "disabled" => bail!("Embedding provider is disabled"),
        "openai" | "ollama" => config
            .model
            .as_deref()
            .ok_or_else(|| anyhow!("embedding.model required"))?,
        other => bail!("Unknown embedding provider: {}", other),
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let body = serde_json::json!({
        "model": model,
        "input": texts,
    });

    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let request = match config.provider.as_str() {
            "openai" => {
                let url = config.url.as_deref().unwrap_or(OPENAI_DEFAULT_URL);
                let api_key = resolve_api_key(config.api_key.as_deref(), &config.api_key_env)?;
                client
                    .post(format!("{}/embeddings", url.trim_end_matches('/')))
                    .bearer_auth(api_key)
            }
            _ => {
                let url = config.url.as_deref().unwrap_or(OLLAMA_DEFAULT_URL);
                client.post(format!("{}/api/embed", url.trim_end_matches('/')))
            }
        };

        match request.json(&body).send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    let json: serde_json::Value = response.json().await?;
                    let vectors = match config.provider.as_str() {
                        "openai" => parse_openai_response(&json)?,
                        _ => parse_ollama_response(&json)?,
                    };
                    if vectors.len() != texts.len() {
                        bail!(
                            "Embedding response has {} vectors for {} inputs",
                            vectors.len(),
                            texts.len()
                        );
                    }
                    return Ok(vectors);
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(anyhow!("Embedding API error {}: {}", status, body_text));
                    continue;
                }

                bail!("Embedding API error {}: {}", status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow!("Embedding request failed: {}", e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("Embedding failed after retries")))
}

/// Embed a single query text in one attempt.
pub async fn embed_query(config: &EmbeddingConfig, text: &str) -> Result<Vec<f32>> {
    embed_texts(config, &[text.to_string()], 0)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("Empty embedding response"))
}

fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))?;
        indexed.push((index, json_to_vec(embedding)));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding
                .as_array()
                .map(|values| json_to_vec(values))
                .ok_or_else(|| anyhow!("Invalid Ollama response: embedding is not an array"))
        })
        .collect()
}

fn json_to_vec(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

/// Encode a float vector as little-endian `f32` bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
