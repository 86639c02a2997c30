use anyhow::{Context, Result};
use async_stream::try_stream;
use async_trait::async_trait;
use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures_util::{Stream, StreamExt};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Display;
use tracing::debug;

use crate::adapters::error::{check_status, BackendError};
use crate::adapters::llm::{
    Backend, ChatBackend, ChatRequest, Completion, FragmentStream, Message, ModelConfig, ToolCall,
    Usage,
};

/// Key the Ollama shim expects; the server ignores its value.
const OLLAMA_API_KEY: &str = "ollama";

/// Client for every backend reachable through the OpenAI chat completions
/// shape: OpenAI itself, Gemini's compatibility endpoint and a local Ollama
/// server.
pub struct OpenAiCompatibleClient {
    backend: Backend,
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [Value]>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct Choice {
    #[serde(default)]
    index: usize,
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default = "assistant_role")]
    role: String,
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
    total_tokens: usize,
}

#[derive(Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    error: Option<Value>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    content: Option<String>,
}

fn assistant_role() -> String {
    "assistant".to_string()
}

/// Builds the outgoing message list: the system instruction first, then the
/// conversation in order. The conversation itself is left untouched.
pub fn synthesize_messages(system: &str, conversation: &[Message]) -> Vec<Message> {
    let mut messages = Vec::with_capacity(conversation.len() + 1);
    if !system.is_empty() {
        messages.push(Message::system(system));
    }
    messages.extend(conversation.iter().cloned());
    messages
}

impl OpenAiCompatibleClient {
    pub fn new(backend: Backend, config: ModelConfig) -> Result<Self> {
        anyhow::ensure!(
            backend.is_openai_compatible(),
            "{} does not speak the OpenAI chat completions API",
            backend.vendor()
        );

        let api_key = match backend {
            Backend::Ollama => config.api_key.clone().or_else(|| Some(OLLAMA_API_KEY.to_string())),
            _ => config.api_key.clone(),
        };

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| backend.default_base_url().to_string());

        let client = config.http_client()?;

        Ok(Self {
            backend,
            client,
            api_key,
            base_url,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn post(&self, body: &ChatCompletionRequest<'_>) -> RequestBuilder {
        let mut builder = self
            .client
            .post(self.endpoint())
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(api_key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", api_key));
        }
        builder
    }

    fn build_body<'a>(&self, request: &'a ChatRequest, stream: bool) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model: &request.model,
            messages: synthesize_messages(&request.system, &request.messages),
            tools: (!request.tools.is_empty()).then_some(request.tools.as_slice()),
            stream,
        }
    }
}

#[async_trait]
impl ChatBackend for OpenAiCompatibleClient {
    fn kind(&self) -> Backend {
        self.backend
    }

    async fn send_once(&self, request: &ChatRequest) -> Result<Completion> {
        let body = self.build_body(request, false);
        debug!(
            backend = %self.backend,
            model = %request.model,
            messages = body.messages.len(),
            tools = request.tools.len(),
            "sending chat completion"
        );

        let response = self
            .post(&body)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", self.backend.vendor()))?;
        let response = check_status(self.backend, response).await?;

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", self.backend.vendor()))?;

        into_completion(self.backend, parsed)
    }

    async fn send_stream(&self, request: &ChatRequest) -> Result<FragmentStream> {
        let body = self.build_body(request, true);
        debug!(
            backend = %self.backend,
            model = %request.model,
            messages = body.messages.len(),
            "opening chat completion stream"
        );

        let response = self
            .post(&body)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", self.backend.vendor()))?;
        let response = check_status(self.backend, response).await?;

        let events = response.bytes_stream().eventsource();
        Ok(Box::pin(chunk_fragments(self.backend, events)))
    }
}

fn into_completion(backend: Backend, response: ChatCompletionResponse) -> Result<Completion> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or(BackendError::EmptyResponse { backend })?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| ToolCall {
            id: call.id,
            name: call.function.name,
            arguments: parse_arguments(call.function.arguments),
        })
        .collect();

    Ok(Completion {
        index: choice.index,
        message: Message::new(choice.message.role, choice.message.content.unwrap_or_default()),
        tool_calls,
        finish_reason: choice.finish_reason,
        model: response.model,
        usage: response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }),
    })
}

// Function arguments arrive as a JSON-encoded string.
fn parse_arguments(arguments: String) -> Value {
    match serde_json::from_str(&arguments) {
        Ok(value) => value,
        Err(_) => Value::String(arguments),
    }
}

fn chunk_fragments<S, E>(backend: Backend, events: S) -> impl Stream<Item = Result<String>> + Send
where
    S: Stream<Item = Result<Event, EventStreamError<E>>> + Send,
    E: Display + Send,
{
    try_stream! {
        futures_util::pin_mut!(events);
        while let Some(event) = events.next().await {
            let event = event.map_err(|e| BackendError::Stream {
                backend,
                message: e.to_string(),
            })?;

            let data = event.data.trim();
            if data == "[DONE]" {
                break;
            }
            if data.is_empty() {
                continue;
            }

            if let Some(fragment) = chunk_fragment(backend, data)? {
                yield fragment;
            }
        }
    }
}

/// Text carried by one stream chunk, if any. A chunk holding an `error`
/// object ends the stream with that error.
fn chunk_fragment(backend: Backend, data: &str) -> Result<Option<String>> {
    let chunk: ChatCompletionChunk = serde_json::from_str(data)
        .with_context(|| format!("Failed to parse {} stream chunk", backend.vendor()))?;

    if let Some(error) = chunk.error {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(BackendError::Stream { backend, message }.into());
    }

    let fragment = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty());
    Ok(fragment)
}
