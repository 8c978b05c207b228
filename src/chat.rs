//! Chat-completion providers.
//!
//! [`OpenAiChat`] calls `POST /v1/chat/completions`. With streaming on, the
//! server-sent `data:` lines are decoded as they arrive, each content delta
//! is echoed to stdout, and the concatenated text is returned.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ChatConfig, Config};
use crate::error::ServiceError;
use crate::models::Message;
use crate::traits::ChatCompletion;

const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";

/// Build the chat provider selected by `chat.provider`.
pub fn create_chat(config: &Config) -> Result<Arc<dyn ChatCompletion>> {
    match config.chat.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledChat)),
        "openai" => Ok(Arc::new(OpenAiChat::new(&config.chat)?)),
        other => bail!("Unknown chat provider: {}", other),
    }
}

pub struct DisabledChat;

#[async_trait]
impl ChatCompletion for DisabledChat {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _messages: &[Message], _stream: bool) -> Result<String, ServiceError> {
        Err(ServiceError::Other("Chat provider is disabled".to_string()))
    }
}

pub struct OpenAiChat {
    client: reqwest::Client,
    model: String,
    url: String,
    api_key: String,
}

impl OpenAiChat {
    pub fn new(config: &ChatConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("chat.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            model,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string()),
            api_key,
        })
    }
}

#[async_trait]
impl ChatCompletion for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[Message], stream: bool) -> Result<String, ServiceError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": stream,
        });

        let mut response = self
            .client
            .post(format!(
                "{}/v1/chat/completions",
                self.url.trim_end_matches('/')
            ))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::Server(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(ServiceError::from_status(status.as_u16(), body_text));
        }

        if !stream {
            let json: serde_json::Value = response
                .json()
                .await
                .map_err(|e| ServiceError::Server(format!("unreadable response: {}", e)))?;
            return parse_completion(&json);
        }

        let mut text = String::new();
        let mut pending = String::new();
        let mut stdout = std::io::stdout();
        'read: while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ServiceError::Server(format!("stream interrupted: {}", e)))?
        {
            pending.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(newline) = pending.find('\n') {
                let line: String = pending.drain(..=newline).collect();
                match parse_sse_line(line.trim_end()) {
                    SseEvent::Delta(delta) => {
                        let _ = write!(stdout, "{}", delta);
                        let _ = stdout.flush();
                        text.push_str(&delta);
                    }
                    SseEvent::Done => break 'read,
                    SseEvent::Skip => {}
                }
            }
        }
        println!();
        Ok(text)
    }
}

fn parse_completion(json: &serde_json::Value) -> Result<String, ServiceError> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| ServiceError::Other("Invalid chat response: missing content".to_string()))
}

/// One decoded server-sent-events line.
#[derive(Debug, PartialEq)]
pub enum SseEvent {
    Delta(String),
    Done,
    Skip,
}

pub fn parse_sse_line(line: &str) -> SseEvent {
    let Some(payload) = line.strip_prefix("data:") else {
        return SseEvent::Skip;
    };
    let payload = payload.trim();
    if payload == "[DONE]" {
        return SseEvent::Done;
    }
    serde_json::from_str::<serde_json::Value>(payload)
        .ok()
        .and_then(|json| {
            json.pointer("/choices/0/delta/content")
                .and_then(|c| c.as_str())
                .map(str::to_string)
        })
        .map_or(SseEvent::Skip, SseEvent::Delta)
}
