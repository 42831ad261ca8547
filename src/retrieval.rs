//! Similarity search over the knowledge snippet table.
//!
//! Vectors are stored as BLOBs and scored with cosine similarity in Rust.
//! Results below the threshold are dropped and the rest are capped at
//! `match_count`, best first.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::embedding;
use crate::models::SourceSnippet;

/// Return the snippets most similar to `query_vec`.
pub async fn match_snippets(
    pool: &SqlitePool,
    query_vec: &[f32],
    match_threshold: f32,
    match_count: usize,
) -> Result<Vec<SourceSnippet>> {
    let rows = sqlx::query("SELECT content, metadata_json, embedding FROM knowledge_snippets")
        .fetch_all(pool)
        .await?;

    let mut matches: Vec<SourceSnippet> = rows
        .iter()
        .filter_map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let similarity = embedding::cosine_similarity(query_vec, &embedding::blob_to_vec(&blob));
            if similarity < match_threshold {
                return None;
            }
            let metadata_json: String = row.get("metadata_json");
            Some(SourceSnippet {
                content: row.get("content"),
                metadata: serde_json::from_str(&metadata_json)
                    .unwrap_or_else(|_| serde_json::json!({})),
                similarity,
            })
        })
        .collect();

    matches.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    matches.truncate(match_count);

    Ok(matches)
}

/// Join matched snippets into the context block handed to the model.
pub fn build_context(snippets: &[SourceSnippet]) -> String {
    snippets
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let origin = s
                .metadata
                .get("source")
                .and_then(|v| v.as_str())
                .unwrap_or("knowledge base");
            format!("[{}] ({})\n{}", i + 1, origin, s.content.trim())
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
