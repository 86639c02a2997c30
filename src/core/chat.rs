use anyhow::Result;
use async_stream::try_stream;
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

use crate::adapters::llm::{Backend, ChatBackend, ChatRequest, Completion, Message};

/// Boxed stream of text handed back by [`ChatAdapter::stream`].
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// How streamed text is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamMode {
    /// Each item is the full text generated so far. Suits UIs that redraw
    /// the whole reply on every update.
    Cumulative,
    /// Each item is only the fragment received since the previous one.
    #[default]
    Delta,
}

impl StreamMode {
    pub fn from_cumulative(cumulative: bool) -> Self {
        if cumulative {
            StreamMode::Cumulative
        } else {
            StreamMode::Delta
        }
    }
}

/// One conversation with one backend.
///
/// The conversation only ever grows by appending. The system instruction is
/// kept apart from it and placed on each outgoing request by the backend.
pub struct ChatAdapter {
    backend: Arc<dyn ChatBackend>,
    kind: Backend,
    system: String,
    model: String,
    messages: Vec<Message>,
}

impl ChatAdapter {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        system: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let kind = backend.kind();
        Self {
            backend,
            kind,
            system: system.into(),
            model: model.into(),
            messages: Vec::new(),
        }
    }

    pub fn backend(&self) -> Backend {
        self.kind
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Appends a message without contacting the backend, e.g. to record the
    /// assistant's streamed reply before the next turn.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Appends `message` and sends the whole conversation in one request.
    ///
    /// The message stays in the conversation even when the request fails.
    pub async fn call(&mut self, message: Message, tools: &[Value]) -> Result<Completion> {
        self.messages.push(message);
        let request = self.snapshot(tools);
        debug!(
            backend = %self.kind,
            turns = self.messages.len(),
            "dispatching call"
        );
        self.backend.send_once(&request).await
    }

    /// Appends `message` and returns a lazy stream of the reply.
    ///
    /// Nothing is sent until the stream is first polled. The stream owns the
    /// underlying response, so dropping it early closes the connection.
    pub fn stream(&mut self, message: Message, mode: StreamMode) -> TextStream {
        self.messages.push(message);
        let request = self.snapshot(&[]);
        debug!(
            backend = %self.kind,
            turns = self.messages.len(),
            ?mode,
            "dispatching stream"
        );
        Box::pin(emit(Arc::clone(&self.backend), request, mode))
    }

    fn snapshot(&self, tools: &[Value]) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            system: self.system.clone(),
            messages: self.messages.clone(),
            tools: tools.to_vec(),
        }
    }
}

fn emit(
    backend: Arc<dyn ChatBackend>,
    request: ChatRequest,
    mode: StreamMode,
) -> impl Stream<Item = Result<String>> + Send {
    try_stream! {
        let mut fragments = backend.send_stream(&request).await?;
        let mut text = String::new();
        while let Some(fragment) = fragments.next().await {
            let fragment = fragment?;
            match mode {
                StreamMode::Cumulative => {
                    text.push_str(&fragment);
                    yield text.clone();
                }
                StreamMode::Delta => {
                    yield fragment;
                }
            }
        }
    }
}
