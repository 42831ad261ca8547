//! Knowledge ingestion: scrape pages, chunk, embed, store.
//!
//! Inputs are local files or directories and `http(s)://` URLs. Directories
//! are walked for `**/*.md`, `**/*.txt`, `**/*.html` and `**/*.htm`; VCS and
//! build directories are skipped. HTML is reduced to paragraph text before
//! chunking. Snippets whose content hash is already stored are skipped, so
//! re-running ingestion over the same site is cheap.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::chunk::{chunk_text, Snippet};
use crate::config::Config;
use crate::db;
use crate::embedding::{self, create_provider};
use crate::migrate;

const INCLUDE_GLOBS: &[&str] = &["**/*.md", "**/*.txt", "**/*.html", "**/*.htm"];
const EXCLUDE_GLOBS: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

/// Block-level elements that end a paragraph.
/// Wrap width handed to the HTML renderer. Wide enough that paragraphs
/// stay on one line in practice.
const TEXT_WIDTH: usize = 400;

/// One scraped page or file, reduced to plain text.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub source: String,
    pub text: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub documents: usize,
    pub snippets_found: usize,
    pub snippets_skipped: usize,
    pub snippets_written: usize,
}

/// CLI entry point for `siteassist ingest`.
pub async fn run_ingest(config: &Config, inputs: &[String]) -> Result<()> {
    if inputs.is_empty() {
        bail!("Nothing to ingest: pass at least one path or URL");
    }
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;

    let report = ingest_inputs(config, &pool, inputs).await?;
    println!("ingest ok");
    println!("  documents: {}", report.documents);
    println!("  snippets found: {}", report.snippets_found);
    println!("  snippets skipped (already stored): {}", report.snippets_skipped);
    println!("  snippets written: {}", report.snippets_written);
    Ok(())
}

pub async fn ingest_inputs(
    config: &Config,
    pool: &SqlitePool,
    inputs: &[String],
) -> Result<IngestReport> {
    if !config.embedding.is_enabled() {
        bail!("Ingestion requires an embedding provider; set [embedding] provider in the config");
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.embedding.timeout_secs))
        .build()?;

    let mut documents = Vec::new();
    for input in inputs {
        if input.starts_with("http://") || input.starts_with("https://") {
            documents.push(fetch_url(&client, input).await?);
        } else {
            documents.extend(collect_files(Path::new(input))?);
        }
    }

    let mut report = IngestReport {
        documents: documents.len(),
        ..IngestReport::default()
    };

    let mut pending: Vec<(String, Snippet)> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for doc in &documents {
        for snippet in chunk_text(&doc.text, config.chunking.max_tokens) {
            report.snippets_found += 1;
            if !seen.insert(snippet.hash.clone()) || hash_exists(pool, &snippet.hash).await? {
                report.snippets_skipped += 1;
                continue;
            }
            pending.push((doc.source.clone(), snippet));
        }
    }

    let provider = create_provider(&config.embedding)?;
    let batch_size = config.embedding.batch_size.max(1);

    for batch in pending.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|(_, s)| s.text.clone()).collect();
        let vectors = embedding::embed_texts(&config.embedding, &texts, config.embedding.max_retries)
            .await
            .context("Failed to embed snippets")?;

        for ((source, snippet), vector) in batch.iter().zip(vectors) {
            if vector.len() != provider.dims() {
                bail!(
                    "Embedding has {} dims, expected {} (embedding.dims)",
                    vector.len(),
                    provider.dims()
                );
            }
            insert_snippet(pool, source, snippet, &vector, provider.model_name()).await?;
            report.snippets_written += 1;
        }
        tracing::info!(written = report.snippets_written, total = pending.len(), "embedded batch");
    }

    Ok(report)
}

/// Read a file, or walk a directory for supported files in path order.
pub fn collect_files(path: &Path) -> Result<Vec<SourceDocument>> {
    if !path.exists() {
        bail!("Input does not exist: {}", path.display());
    }
    if path.is_file() {
        return Ok(vec![read_document(path)?]);
    }

    let include = build_globset(INCLUDE_GLOBS)?;
    let exclude = build_globset(EXCLUDE_GLOBS)?;

    let mut docs = Vec::new();
    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(path).unwrap_or(entry.path());
        let rel_str = relative.to_string_lossy();
        if exclude.is_match(rel_str.as_ref()) || !include.is_match(rel_str.as_ref()) {
            continue;
        }
        docs.push(read_document(entry.path())?);
    }
    Ok(docs)
}

fn read_document(path: &Path) -> Result<SourceDocument> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let is_html = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("html") || ext.eq_ignore_ascii_case("htm"))
        .unwrap_or(false);

    Ok(SourceDocument {
        source: path.display().to_string(),
        text: if is_html { html_to_text(&raw)? } else { raw },
    })
}

async fn fetch_url(client: &reqwest::Client, url: &str) -> Result<SourceDocument> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to fetch {}", url))?
        .error_for_status()
        .with_context(|| format!("Failed to fetch {}", url))?;

    let is_plain = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("text/plain") || ct.starts_with("text/markdown"))
        .unwrap_or(false);
    let body = response.text().await?;

    tracing::info!(url, bytes = body.len(), "fetched page");
    Ok(SourceDocument {
        source: url.to_string(),
        text: if is_plain { body } else { html_to_text(&body)? },
    })
}

/// Reduce an HTML page to paragraph text.
///
/// Rendering is done by `html2text` without markdown decorations, so
/// `script`/`style` and comments are dropped and entities decoded. The
/// output is then normalised to trimmed lines with paragraphs separated by
/// one blank line, which is what [`chunk_text`] splits on.
pub fn html_to_text(html: &str) -> Result<String> {
    let rendered = html2text::config::plain_no_decorate()
        .string_from_read(html.as_bytes(), TEXT_WIDTH)
        .context("Failed to render HTML")?;

    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in rendered.lines().map(str::trim) {
        if line.is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join("\n"));
    }
    Ok(paragraphs.join("\n\n"))
}

async fn hash_exists(pool: &SqlitePool, hash: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM knowledge_snippets WHERE content_hash = ?")
        .bind(hash)
        .fetch_one(pool)
        .await?;
    Ok(count > 0)
}

async fn insert_snippet(
    pool: &SqlitePool,
    source: &str,
    snippet: &Snippet,
    vector: &[f32],
    model: &str,
) -> Result<()> {
    let metadata = serde_json::json!({ "source": source, "chunk": snippet.index });
    sqlx::query(
        "INSERT OR IGNORE INTO knowledge_snippets
         (id, content, metadata_json, embedding, model, dims, content_hash, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&snippet.text)
    .bind(metadata.to_string())
    .bind(embedding::vec_to_blob(vector))
    .bind(model)
    .bind(vector.len() as i64)
    .bind(&snippet.hash)
    .bind(chrono::Utc::now().timestamp())
    .execute(pool)
    .await?;
    Ok(())
}

fn build_globset(patterns: &[&str]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_html_to_text_strips_markup() {
        let html = r#"<html><head><style>p { color: red; }</style>
            <script>var x = "nope";</script></head>
            <body><!-- nav --><h1>Our Services</h1>
            <p>We build <strong>web</strong> and mobile apps.</p>
            <p>Fish &amp; chips &#8212; &lt;fast&gt;</p></body></html>"#;
        let text = html_to_text(html).unwrap();
        assert!(!text.contains("color"));
        assert!(!text.contains("nope"));
        assert!(!text.contains("nav"));
        assert!(!text.contains("**"));
        assert!(text.contains("Our Services"));
        assert!(text.contains("We build web and mobile apps."));
        assert!(text.contains("Fish & chips \u{2014} <fast>"));
    }

    #[test]
    fn test_html_paragraphs_separated_by_blank_line() {
        let text = html_to_text("<p>First para.</p><p>Second para.</p>").unwrap();
        assert_eq!(text, "First para.\n\nSecond para.");
    }

    #[test]
    fn test_html_br_keeps_line() {
        let text = html_to_text("<p>Line one<br>Line two</p>").unwrap();
        assert_eq!(text, "Line one\nLine two");
    }

    #[test]
    fn test_collect_files_filters_extensions() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("about.md"), "About us").unwrap();
        std::fs::write(tmp.path().join("index.html"), "<p>Home</p>").unwrap();
        std::fs::write(tmp.path().join("logo.png"), [0u8, 1, 2]).unwrap();
        std::fs::create_dir_all(tmp.path().join(".git")).unwrap();
        std::fs::write(tmp.path().join(".git/notes.txt"), "skip").unwrap();

        let docs = collect_files(tmp.path()).unwrap();
        let texts: Vec<&str> = docs.iter().map(|d| d.text.as_str()).collect();
        assert_eq!(texts, vec!["About us", "Home"]);
    }

    #[test]
    fn test_collect_missing_path_fails() {
        assert!(collect_files(Path::new("/definitely/not/here")).is_err());
    }

    #[tokio::test]
    async fn test_fetch_url_reduces_html() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/services"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "<html><body><h2>Cloud</h2><p>Migrations &amp; support.</p></body></html>",
                "text/html; charset=utf-8",
            ))
            .mount(&server)
            .await;

        let url = format!("{}/services", server.uri());
        let doc = fetch_url(&reqwest::Client::new(), &url).await.unwrap();
        assert_eq!(doc.source, url);
        assert_eq!(doc.text, "Cloud\n\nMigrations & support.");
    }

    #[tokio::test]
    async fn test_fetch_url_passes_plain_text_through() {
        let server = MockServer::start().await;
        let body = "Plain <b>text</b> &amp; more\n\nSecond paragraph.";
        Mock::given(method("GET"))
            .and(path("/notes.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/plain"))
            .mount(&server)
            .await;

        let url = format!("{}/notes.txt", server.uri());
        let doc = fetch_url(&reqwest::Client::new(), &url).await.unwrap();
        assert_eq!(doc.text, body);
    }

    #[tokio::test]
    async fn test_fetch_url_not_found_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/missing", server.uri());
        let err = fetch_url(&reqwest::Client::new(), &url).await.unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to fetch"));
    }

    #[tokio::test]
    async fn test_ingest_requires_embeddings() {
        let tmp = TempDir::new().unwrap();
        let config = Config::minimal(tmp.path().join("db.sqlite"));
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let err = ingest_inputs(&config, &pool, &["x".to_string()]).await.unwrap_err();
        assert!(err.to_string().contains("embedding provider"));
    }

    #[tokio::test]
    async fn test_ingest_stores_and_skips_duplicates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    { "index": 0, "embedding": [1.0, 0.0, 0.0] },
                    { "index": 1, "embedding": [0.0, 1.0, 0.0] }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let site = tmp.path().join("site");
        std::fs::create_dir_all(&site).unwrap();
        std::fs::write(site.join("a.md"), "We offer cloud training.").unwrap();
        std::fs::write(site.join("b.md"), "We are hiring engineers.").unwrap();

        let mut config = Config::minimal(tmp.path().join("db.sqlite"));
        config.embedding.provider = "openai".to_string();
        config.embedding.model = Some("text-embedding-3-small".to_string());
        config.embedding.dims = Some(3);
        config.embedding.url = Some(server.uri());
        config.embedding.api_key = Some("sk-test".to_string());

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate::apply(&pool).await.unwrap();

        let inputs = vec![site.display().to_string()];
        let first = ingest_inputs(&config, &pool, &inputs).await.unwrap();
        assert_eq!(first.documents, 2);
        assert_eq!(first.snippets_written, 2);

        let second = ingest_inputs(&config, &pool, &inputs).await.unwrap();
        assert_eq!(second.snippets_skipped, 2);
        assert_eq!(second.snippets_written, 0);

        let metadata: String = sqlx::query_scalar(
            "SELECT metadata_json FROM knowledge_snippets WHERE content = 'We offer cloud training.'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert!(metadata.contains("a.md"));
    }
}
