//! Text generation over an OpenAI-compatible chat completions API

use crate::compose::PromptPayload;
use crate::config::LlmConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("API key not set: environment variable {0} is empty")]
    MissingApiKey(String),

    #[error("HTTP client error: {0}")]
    Client(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed response: {0}")]
    InvalidResponse(String),

    #[error("All {attempts} attempts failed: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

impl From<GenerationError> for crate::error::MemoragError {
    fn from(e: GenerationError) -> Self {
        crate::error::MemoragError::ExternalServiceUnavailable {
            service: "text generation".to_string(),
            message: e.to_string(),
        }
    }
}

/// Opaque text generation service
pub trait TextGenerator: Send + Sync {
    fn generate(&self, payload: &PromptPayload) -> Result<String, GenerationError>;

    fn name(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Debug, Deserialize)]
struct ChatContent {
    content: Option<String>,
}

/// Generator for DeepSeek, OpenAI, Groq, Ollama and other endpoints that
/// expose `/chat/completions`
pub struct OpenAiCompatGenerator {
    client: reqwest::blocking::Client,
    name: String,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
    retry_delay: Duration,
}

impl OpenAiCompatGenerator {
    /// Build from configuration, reading the API key from `api_key_env`.
    /// Ollama runs without a key.
    pub fn from_config(config: &LlmConfig) -> Result<Self, GenerationError> {
        let api_key = match std::env::var(&config.api_key_env) {
            Ok(key) if !key.trim().is_empty() => key,
            _ if config.provider == "ollama" => "ollama".to_string(),
            _ => return Err(GenerationError::MissingApiKey(config.api_key_env.clone())),
        };

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GenerationError::Client(e.to_string()))?;

        Ok(Self {
            client,
            name: config.provider.clone(),
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        })
    }

    fn call(&self, prompt: &str) -> Result<String, GenerationError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .map_err(|e| GenerationError::Client(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| GenerationError::InvalidResponse("no completion content".to_string()))
    }
}

impl TextGenerator for OpenAiCompatGenerator {
    fn generate(&self, payload: &PromptPayload) -> Result<String, GenerationError> {
        let mut last_error = String::new();

        for attempt in 1..=self.max_retries {
            match self.call(&payload.prompt) {
                Ok(text) => return Ok(text),
                // Client errors will not improve on retry
                Err(GenerationError::Status { status, body }) if (400..500).contains(&status) && status != 429 => {
                    return Err(GenerationError::Status { status, body });
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < self.max_retries {
                        tracing::warn!(
                            "Generation attempt {}/{} failed, retrying: {}",
                            attempt,
                            self.max_retries,
                            e
                        );
                        std::thread::sleep(self.retry_delay);
                    }
                }
            }
        }

        Err(GenerationError::RetriesExhausted {
            attempts: self.max_retries,
            last_error,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_missing_api_key() {
        let mut config = Config::default().llm;
        config.api_key_env = "MEMORAG_TEST_UNSET_KEY_7731".to_string();
        assert!(matches!(
            OpenAiCompatGenerator::from_config(&config),
            Err(GenerationError::MissingApiKey(_))
        ));
    }

    #[test]
    fn test_ollama_needs_no_key() {
        let mut config = Config::default().llm;
        config.provider = "ollama".to_string();
        config.base_url = "http://localhost:11434/v1/".to_string();
        config.api_key_env = "MEMORAG_TEST_UNSET_KEY_7732".to_string();

        let generator = OpenAiCompatGenerator::from_config(&config).unwrap();
        assert_eq!(generator.name(), "ollama");
        assert_eq!(generator.endpoint, "http://localhost:11434/v1/chat/completions");
    }

    #[test]
    fn test_request_shape() {
        let request = ChatRequest {
            model: "deepseek-chat",
            messages: vec![ChatMessage {
                role: "user",
                content: "hi",
            }],
            max_tokens: 1000,
            temperature: 0.7,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["max_tokens"], 1000);
    }

    #[test]
    fn test_response_parsing() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"Agilent reported 31.4%."}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(
            parsed.choices[0].message.content.as_deref(),
            Some("Agilent reported 31.4%.")
        );
    }
}
