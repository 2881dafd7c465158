use crate::error::{Result, SynthesisError};
use crate::generator::TextGenerator;
use async_trait::async_trait;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

const SYSTEM_PROMPT: &str =
    "You write concise GitHub epic issues that summarize a group of related issues.";

/// Fixed-delay retry for transient failures (429, 5xx).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    /// `None` retries until the call stops failing transiently.
    pub max_retries: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RETRY_DELAY,
            max_retries: None,
        }
    }
}

impl RetryPolicy {
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Err(err) if err.is_transient() && self.allows(attempt) => {
                    attempt += 1;
                    log::warn!(
                        "Transient failure ({err}); retry {attempt} in {}s",
                        self.delay.as_secs_f32()
                    );
                    tokio::time::sleep(self.delay).await;
                }
                other => return other,
            }
        }
    }

    fn allows(&self, attempt: u32) -> bool {
        self.max_retries.map_or(true, |max| attempt < max)
    }
}

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub retry: RetryPolicy,
}

/// Client for OpenAI-compatible `chat/completions` endpoints.
pub struct ChatCompletionsGenerator {
    client: reqwest::Client,
    config: ChatConfig,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
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

impl ChatCompletionsGenerator {
    pub fn new(config: ChatConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Generator for `api_key`, or `None` when the key is absent or blank.
    pub fn from_api_key(
        api_key: Option<String>,
        base_url: Option<String>,
        model: Option<String>,
        retry: RetryPolicy,
    ) -> Option<Self> {
        let api_key = api_key.filter(|key| !key.trim().is_empty())?;
        Some(Self::new(ChatConfig {
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_key,
            retry,
        }))
    }

    /// Reads the key from `EPIC_LLM_API_KEY`, then `OPENAI_API_KEY`.
    pub fn from_env(
        base_url: Option<String>,
        model: Option<String>,
        retry: RetryPolicy,
    ) -> Option<Self> {
        let key = std::env::var("EPIC_LLM_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        Self::from_api_key(key, base_url, model, retry)
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    async fn complete_once(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt},
            ],
            "temperature": 0.2,
        });

        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| SynthesisError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let body_text = response
            .text()
            .await
            .map_err(|e| SynthesisError::Network(e.to_string()))?;

        if status != 200 {
            return Err(SynthesisError::from_status(status, &body_text));
        }
        extract_content(&body_text)
    }
}

fn extract_content(body: &str) -> Result<String> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|e| SynthesisError::Parse(e.to_string()))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| SynthesisError::Parse("response has no message content".to_string()))
}

#[async_trait]
impl TextGenerator for ChatCompletionsGenerator {
    fn name(&self) -> String {
        format!("chat:{}", self.config.model)
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        self.config.retry.run(|| self.complete_once(prompt)).await
    }
}
