//! Client for an OpenAI-compatible inference service.
//!
//! Two calls: a health probe (`GET /models`, any 2xx is healthy) and a chat
//! completion (`POST /chat/completions`). Every failure is classified into
//! a `RemoteError` that knows its own user-facing text.

use anyhow::Context;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::RemoteConfig;
use crate::conversation::{Message, Role};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are \"Xiao IN\", a senior study-abroad consultant and back-office assistant with more than thirty years of experience in international education.

Knowledge: education systems and admission requirements of the United States, the United Kingdom, Canada, Australia, New Zealand, Europe and Asia; application strategy for high school, undergraduate, master's and doctoral programmes; scholarships and funding; student visas; settling in abroad and career planning.

Style: answer as an experienced consultant, tailor advice to the student's situation, stay accurate and never exaggerate. Use short paragraphs separated by a blank line, one topic per paragraph, and bullet points for lists. A relevant emoji before each key point is welcome (🎓 academics, 🌍 countries, 📝 applications, 💰 funding, ✈️ visas, 🏫 schools, ⏰ deadlines, 💡 tips).";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RemoteError {
    #[error("request timed out")]
    Timeout,
    #[error("service unreachable")]
    Unreachable,
    #[error("authorization rejected")]
    Auth,
    #[error("rate limited")]
    RateLimited,
    #[error("response had no candidate message")]
    Malformed,
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("request cancelled")]
    Cancelled,
    #[error("{0}")]
    Other(String),
}

impl RemoteError {
    pub fn user_message(&self) -> String {
        match self {
            RemoteError::Timeout => {
                "The connection timed out. Please check your network and try again later.".to_string()
            }
            RemoteError::Unreachable => "Unable to reach the AI service. Please check your network connection or try again later. You can also switch to local knowledge mode.".to_string(),
            RemoteError::Auth => {
                "The AI service rejected our credentials. Please check that the API key is valid.".to_string()
            }
            RemoteError::RateLimited => {
                "Too many requests to the AI service. Please try again later.".to_string()
            }
            RemoteError::Malformed => {
                "Sorry, I can't answer that right now. Please try again later.".to_string()
            }
            RemoteError::Cancelled => "The request was cancelled.".to_string(),
            RemoteError::Connection(detail) | RemoteError::Other(detail) => format!(
                "Sorry, something went wrong while contacting the AI service. Please check your network connection or try again later. Details: {}",
                detail
            ),
        }
    }

    /// Failures that say the service cannot be reached at all.
    pub fn marks_offline(&self) -> bool {
        matches!(
            self,
            RemoteError::Timeout | RemoteError::Unreachable | RemoteError::Connection(_)
        )
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RemoteError::Timeout
        } else if e.is_connect() {
            RemoteError::Connection(e.to_string())
        } else if let Some(status) = e.status() {
            classify_status(status, "")
        } else {
            RemoteError::Other(e.to_string())
        }
    }
}

fn classify_status(status: StatusCode, body: &str) -> RemoteError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Auth,
        StatusCode::TOO_MANY_REQUESTS => RemoteError::RateLimited,
        _ if body.is_empty() => RemoteError::Other(format!("API error: {}", status)),
        _ => RemoteError::Other(format!("API error ({}): {}", status, body)),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub role: String,
    pub content: String,
}

impl ChatEntry {
    fn new(role: &str, content: impl Into<String>) -> Self {
        ChatEntry {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

/// System entry first, then the conversation as plain role/content pairs.
pub fn chat_entries(system_prompt: &str, history: &[Message]) -> Vec<ChatEntry> {
    std::iter::once(ChatEntry::new("system", system_prompt))
        .chain(history.iter().map(|message| {
            let role = match message.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            ChatEntry::new(role, message.text.clone())
        }))
        .collect()
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatEntry],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

fn parse_chat_response(body: &str) -> Result<String, RemoteError> {
    let response: ChatResponse = serde_json::from_str(body).map_err(|e| {
        warn!("chat response did not parse: {}", e);
        RemoteError::Malformed
    })?;

    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or(RemoteError::Malformed)
}

pub struct RemoteClient {
    base_url: String,
    model: String,
    api_key: String,
    temperature: f32,
    max_tokens: u32,
    probe_timeout: Duration,
    client: reqwest::Client,
}

impl RemoteClient {
    pub fn with_config(config: &RemoteConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(RemoteClient {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.resolve_api_key(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            probe_timeout: Duration::from_secs(config.probe_timeout_secs),
            client,
        })
    }

    pub async fn probe(&self) -> Result<(), RemoteError> {
        debug!(base_url = %self.base_url, "probing inference service");
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(self.probe_timeout)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(%status, "probe succeeded");
            Ok(())
        } else {
            Err(classify_status(status, ""))
        }
    }

    pub async fn chat(&self, entries: &[ChatEntry]) -> Result<String, RemoteError> {
        let request = ChatRequest {
            model: &self.model,
            messages: entries,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        info!(model = %self.model, entries = entries.len(), "sending chat request");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            warn!(%status, "chat request rejected");
            return Err(classify_status(status, body.trim()));
        }

        parse_chat_response(&body)
    }
}
