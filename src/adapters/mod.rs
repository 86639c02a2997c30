pub mod anthropic;
pub mod error;
pub mod llm;
pub mod openai;

pub use anthropic::AnthropicClient;
pub use error::BackendError;
pub use llm::{Backend, ChatBackend, ChatRequest, Completion, Message, ModelConfig, ToolCall};
pub use openai::OpenAiCompatibleClient;
