//! One chat interface over several hosted LLM APIs and a local model server.
//!
//! Pick a [`Backend`], build a [`ChatAdapter`] on its handle and either
//! [`call`](ChatAdapter::call) it for a single completion or
//! [`stream`](ChatAdapter::stream) the reply fragment by fragment.

pub mod adapters;
pub mod config;
pub mod core;

pub use crate::adapters::{Backend, BackendError, ChatBackend, Completion, Message, ToolCall};
pub use crate::config::Config;
pub use crate::core::{load_all_bots, Bots, ChatAdapter, Credentials, StreamMode, TextStream};
