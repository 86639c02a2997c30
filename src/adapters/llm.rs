use anyhow::Result;
use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::pin::Pin;
use std::str::FromStr;

/// Boxed stream of raw text fragments as the backend delivers them.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[value(name = "openai")]
    OpenAi,
    Claude,
    Gemini,
    Ollama,
}

impl Backend {
    pub const ALL: [Backend; 4] = [
        Backend::OpenAi,
        Backend::Claude,
        Backend::Gemini,
        Backend::Ollama,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::OpenAi => "openai",
            Backend::Claude => "claude",
            Backend::Gemini => "gemini",
            Backend::Ollama => "ollama",
        }
    }

    /// Human-facing vendor name used in logs and error messages.
    pub fn vendor(&self) -> &'static str {
        match self {
            Backend::OpenAi => "OpenAI",
            Backend::Claude => "Anthropic",
            Backend::Gemini => "Gemini",
            Backend::Ollama => "Ollama",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Backend::OpenAi => "gpt-4o-mini",
            Backend::Claude => "claude-3-haiku-20240307",
            Backend::Gemini => "gemini-2.0-flash",
            Backend::Ollama => "llama3.2",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Backend::OpenAi => "https://api.openai.com/v1",
            Backend::Claude => "https://api.anthropic.com/v1",
            Backend::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai/",
            Backend::Ollama => "http://localhost:11434/v1",
        }
    }

    /// Claude speaks the Anthropic messages API; the rest go through the
    /// OpenAI chat completions shape.
    pub fn is_openai_compatible(&self) -> bool {
        !matches!(self, Backend::Claude)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" | "open_ai" | "gpt" => Ok(Backend::OpenAi),
            "claude" | "anthropic" => Ok(Backend::Claude),
            "gemini" | "google" => Ok(Backend::Gemini),
            "ollama" | "local" => Ok(Backend::Ollama),
            other => anyhow::bail!("Unknown backend: {}", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }
}

/// Everything a backend needs to issue one request. The system instruction
/// travels separately; each backend decides where it goes on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// Normalized single-shot result. Mirrors the fields of an OpenAI choice so
/// callers see the same shape from every backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub index: usize,
    pub message: Message,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<String>,
    pub model: String,
    pub usage: Option<Usage>,
}

impl Completion {
    pub fn text(&self) -> &str {
        &self.message.content
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub temperature: f32,
    pub max_tokens: usize,
    pub timeout_secs: Option<u64>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            temperature: 0.7,
            max_tokens: 500,
            timeout_secs: None,
        }
    }
}

impl ModelConfig {
    pub(crate) fn http_client(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = self.timeout_secs {
            builder = builder.timeout(std::time::Duration::from_secs(secs));
        }
        Ok(builder.build()?)
    }
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn kind(&self) -> Backend;

    async fn send_once(&self, request: &ChatRequest) -> Result<Completion>;

    /// Opens a streaming request. The returned stream owns the response body,
    /// so dropping it closes the connection.
    async fn send_stream(&self, request: &ChatRequest) -> Result<FragmentStream>;
}

pub fn create_backend(backend: Backend, config: ModelConfig) -> Result<Box<dyn ChatBackend>> {
    match backend {
        Backend::Claude => Ok(Box::new(crate::adapters::AnthropicClient::new(config)?)),
        other => Ok(Box::new(crate::adapters::OpenAiCompatibleClient::new(
            other, config,
        )?)),
    }
}
