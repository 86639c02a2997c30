use crate::adapters::error::{check_status, BackendError};
use crate::adapters::llm::{
    Backend, ChatBackend, ChatRequest, Completion, FragmentStream, Message, ModelConfig, ToolCall,
    Usage,
};
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

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    client: Client,
    config: ModelConfig,
    api_key: Option<String>,
    base_url: String,
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: usize,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [Value]>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: usize,
    output_tokens: usize,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    ContentBlockDelta { delta: BlockDelta },
    MessageStop,
    Error { error: StreamErrorBody },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct StreamErrorBody {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: String,
}

impl AnthropicClient {
    pub fn new(config: ModelConfig) -> Result<Self> {
        let api_key = config.api_key.clone();

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| Backend::Claude.default_base_url().to_string());

        let client = config.http_client()?;

        Ok(Self {
            client,
            config,
            api_key,
            base_url,
        })
    }

    fn post(&self, body: &AnthropicRequest<'_>) -> RequestBuilder {
        let url = format!("{}/messages", self.base_url.trim_end_matches('/'));
        let mut builder = self
            .client
            .post(url)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(api_key) = &self.api_key {
            builder = builder.header("x-api-key", api_key);
        }
        builder
    }

    // Single-shot requests carry only the token cap; streams also pin the
    // sampling temperature.
    fn build_body<'a>(&self, request: &'a ChatRequest, stream: bool) -> AnthropicRequest<'a> {
        AnthropicRequest {
            model: &request.model,
            messages: &request.messages,
            max_tokens: self.config.max_tokens,
            system: &request.system,
            temperature: stream.then_some(self.config.temperature),
            tools: (!request.tools.is_empty()).then_some(request.tools.as_slice()),
            stream,
        }
    }
}

#[async_trait]
impl ChatBackend for AnthropicClient {
    fn kind(&self) -> Backend {
        Backend::Claude
    }

    async fn send_once(&self, request: &ChatRequest) -> Result<Completion> {
        let body = self.build_body(request, false);
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "sending Anthropic message"
        );

        let response = self
            .post(&body)
            .send()
            .await
            .context("Failed to send request to Anthropic")?;
        let response = check_status(Backend::Claude, response).await?;

        let anthropic_response: AnthropicResponse = response
            .json()
            .await
            .context("Failed to parse Anthropic response")?;

        Ok(into_completion(anthropic_response))
    }

    async fn send_stream(&self, request: &ChatRequest) -> Result<FragmentStream> {
        let body = self.build_body(request, true);
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            "opening Anthropic message stream"
        );

        let response = self
            .post(&body)
            .send()
            .await
            .context("Failed to send request to Anthropic")?;
        let response = check_status(Backend::Claude, response).await?;

        let events = response.bytes_stream().eventsource();
        Ok(Box::pin(text_fragments(events)))
    }
}

fn into_completion(response: AnthropicResponse) -> Completion {
    let text = match response.content.first() {
        Some(ContentBlock::Text { text }) => text.clone(),
        _ => String::new(),
    };

    let tool_calls = response
        .content
        .into_iter()
        .filter_map(|block| match block {
            ContentBlock::ToolUse { id, name, input } => Some(ToolCall {
                id,
                name,
                arguments: input,
            }),
            _ => None,
        })
        .collect();

    Completion {
        index: 0,
        message: Message::assistant(text),
        tool_calls,
        finish_reason: response.stop_reason,
        model: response.model,
        usage: response.usage.map(|u| Usage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: u.input_tokens + u.output_tokens,
        }),
    }
}

fn text_fragments<S, E>(events: S) -> impl Stream<Item = Result<String>> + Send
where
    S: Stream<Item = Result<Event, EventStreamError<E>>> + Send,
    E: Display + Send,
{
    try_stream! {
        futures_util::pin_mut!(events);
        while let Some(event) = events.next().await {
            let event = event.map_err(|e| BackendError::Stream {
                backend: Backend::Claude,
                message: e.to_string(),
            })?;
            if event.data.trim().is_empty() {
                continue;
            }

            match interpret_event(&event.data)? {
                Step::Text(text) => {
                    yield text;
                }
                Step::Stop => break,
                Step::Skip => {}
            }
        }
    }
}

enum Step {
    Text(String),
    Stop,
    Skip,
}

fn interpret_event(data: &str) -> Result<Step> {
    let parsed: StreamEvent =
        serde_json::from_str(data).context("Failed to parse Anthropic stream event")?;

    match parsed {
        StreamEvent::ContentBlockDelta {
            delta: BlockDelta::TextDelta { text },
        } if !text.is_empty() => Ok(Step::Text(text)),
        StreamEvent::MessageStop => Ok(Step::Stop),
        StreamEvent::Error { error } => Err(BackendError::Stream {
            backend: Backend::Claude,
            message: format!("{}: {}", error.kind, error.message),
        }
        .into()),
        _ => Ok(Step::Skip),
    }
}
