use analysis_core::{AnalysisError, ScorerProvider};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{MLError, MLResult};

/// Connection settings for an OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone)]
pub struct ScorerConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl ScorerConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Hosted scorer reached over `POST {base_url}/chat/completions`.
#[derive(Clone)]
pub struct ChatScorerClient {
    client: reqwest::Client,
    config: ScorerConfig,
}

impl ChatScorerClient {
    pub fn new(config: ScorerConfig) -> MLResult<Self> {
        if config.api_key.trim().is_empty() {
            return Err(MLError::NotConfigured("scorer API key is empty".to_string()));
        }

        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self { client, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Send one prompt as a single user message and return the first choice's text.
    pub async fn chat(&self, prompt: &str) -> MLResult<String> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage { role: "user", content: prompt }],
        };

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| if e.is_timeout() { MLError::Timeout } else { MLError::RequestFailed(e) })?;

        if !response.status().is_success() {
            return Err(MLError::ServiceUnavailable(format!("Status: {}", response.status())));
        }

        let body = response.text().await?;
        first_choice_content(&body)
    }
}

fn first_choice_content(body: &str) -> MLResult<String> {
    let parsed: ChatResponse = serde_json::from_str(body)?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| MLError::InvalidResponse("reply carried no content".to_string()))
}

#[async_trait]
impl ScorerProvider for ChatScorerClient {
    async fn complete(&self, prompt: &str) -> Result<String, AnalysisError> {
        Ok(self.chat(prompt).await?)
    }

    fn backend_name(&self) -> &'static str {
        "chat-completions"
    }
}
