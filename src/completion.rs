//! Chat-completion client for an OpenAI-compatible API.
//!
//! One request per call. Callers decide what to show on failure.

use anyhow::{anyhow, bail, Result};
use serde::Serialize;
use std::time::Duration;

use crate::config::{resolve_api_key, ChatConfig};
use crate::models::{HistoryTurn, Role};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionMessage {
    pub role: &'static str,
    pub content: String,
}

/// Assemble the message list: system prompt (+ context), history, then the user message.
pub fn build_messages(
    system_prompt: &str,
    context: &str,
    history: &[HistoryTurn],
    message: &str,
) -> Vec<CompletionMessage> {
    let system = if context.trim().is_empty() {
        system_prompt.to_string()
    } else {
        format!(
            "{}\n\nRelevant information from our knowledge base:\n\n{}",
            system_prompt, context
        )
    };

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(CompletionMessage {
        role: "system",
        content: system,
    });
    for turn in history {
        messages.push(CompletionMessage {
            role: match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: turn.content.clone(),
        });
    }
    messages.push(CompletionMessage {
        role: "user",
        content: message.to_string(),
    });
    messages
}

/// Send `messages` to `POST {url}/chat/completions` and return the reply text.
pub async fn complete(config: &ChatConfig, messages: &[CompletionMessage]) -> Result<String> {
    let api_key = resolve_api_key(config.api_key.as_deref(), &config.api_key_env)?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let body = serde_json::json!({
        "model": config.model,
        "messages": messages,
        "temperature": config.temperature,
        "max_tokens": config.max_tokens,
    });

    let response = client
        .post(format!("{}/chat/completions", config.url.trim_end_matches('/')))
        .bearer_auth(api_key)
        .json(&body)
        .send()
        .await
        .map_err(|e| anyhow!("Chat completion request failed: {}", e))?;

    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        bail!("Chat completion API error {}: {}", status, body_text);
    }

    let json: serde_json::Value = response.json().await?;
    parse_completion(&json)
}

fn parse_completion(json: &serde_json::Value) -> Result<String> {
    let content = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow!("Invalid completion response: missing choices[0].message.content"))?;

    let content = content.trim();
    if content.is_empty() {
        bail!("Completion response was empty");
    }
    Ok(content.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(url: &str) -> ChatConfig {
        ChatConfig {
            url: url.to_string(),
            api_key: Some("test-key".to_string()),
            ..ChatConfig::default()
        }
    }

    #[test]
    fn test_build_messages_order() {
        let history = vec![
            HistoryTurn {
                role: Role::User,
                content: "Do you build apps?".to_string(),
            },
            HistoryTurn {
                role: Role::Assistant,
                content: "Yes, web and mobile.".to_string(),
            },
        ];
        let messages = build_messages("SYSTEM", "CTX", &history, "How long does it take?");
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.contains("CTX"));
        assert_eq!(messages[1].role, "user");
        assert_eq!(messages[2].role, "assistant");
        assert_eq!(messages[3].content, "How long does it take?");
    }

    #[test]
    fn test_build_messages_without_context() {
        let messages = build_messages("SYSTEM", "  ", &[], "hello");
        assert_eq!(messages[0].content, "SYSTEM");
    }

    #[test]
    fn test_parse_completion_rejects_empty() {
        let json = serde_json::json!({ "choices": [{ "message": { "content": "  " } }] });
        assert!(parse_completion(&json).is_err());
        assert!(parse_completion(&serde_json::json!({})).is_err());
    }

    #[tokio::test]
    async fn test_complete_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(serde_json::json!({ "model": "gpt-4o-mini" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{ "message": { "role": "assistant", "content": "We can help." } }]
            })))
            .mount(&server)
            .await;

        let messages = build_messages("SYSTEM", "", &[], "Can you help?");
        let reply = complete(&config(&server.uri()), &messages).await.unwrap();
        assert_eq!(reply, "We can help.");
    }

    #[tokio::test]
    async fn test_complete_error_single_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let messages = build_messages("SYSTEM", "", &[], "hello");
        assert!(complete(&config(&server.uri()), &messages).await.is_err());
    }
}
