use anyhow::Result;
use std::sync::Arc;
use tracing::debug;

use crate::adapters::llm::{create_backend, Backend, ChatBackend};
use crate::config::Config;
use crate::core::chat::ChatAdapter;
use crate::core::credentials::Credentials;

/// One ready-to-use handle per backend.
pub struct Bots {
    pub openai: Arc<dyn ChatBackend>,
    pub claude: Arc<dyn ChatBackend>,
    pub gemini: Arc<dyn ChatBackend>,
    pub ollama: Arc<dyn ChatBackend>,
}

impl Bots {
    pub fn from_credentials(credentials: &Credentials, config: &Config) -> Result<Self> {
        let build = |backend: Backend, api_key: Option<String>| -> Result<Arc<dyn ChatBackend>> {
            let model_config = config.model_config(backend, api_key);
            debug!(
                backend = %backend,
                base_url = model_config.base_url.as_deref().unwrap_or(backend.default_base_url()),
                "building backend"
            );
            Ok(Arc::from(create_backend(backend, model_config)?))
        };

        Ok(Self {
            openai: build(Backend::OpenAi, credentials.openai.clone())?,
            claude: build(Backend::Claude, credentials.anthropic.clone())?,
            gemini: build(Backend::Gemini, credentials.google.clone())?,
            ollama: build(Backend::Ollama, None)?,
        })
    }

    pub fn get(&self, backend: Backend) -> Arc<dyn ChatBackend> {
        match backend {
            Backend::OpenAi => Arc::clone(&self.openai),
            Backend::Claude => Arc::clone(&self.claude),
            Backend::Gemini => Arc::clone(&self.gemini),
            Backend::Ollama => Arc::clone(&self.ollama),
        }
    }

    /// Starts a conversation on the configured backend with the configured
    /// model and system prompt.
    pub fn adapter(&self, config: &Config) -> ChatAdapter {
        ChatAdapter::new(
            self.get(config.backend),
            config.system_prompt(),
            config.effective_model(),
        )
    }
}

/// Resolves credentials from the environment, reports which are present and
/// builds every backend handle.
pub fn load_all_bots(config: &Config) -> Result<Bots> {
    let credentials = Credentials::from_env();
    credentials.report();
    Bots::from_credentials(&credentials, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_tag_maps_to_its_handle() {
        let bots = Bots::from_credentials(&Credentials::default(), &Config::default()).unwrap();
        for backend in Backend::ALL {
            assert_eq!(bots.get(backend).kind(), backend);
        }
    }

    #[test]
    fn adapter_follows_config() {
        let config = Config {
            backend: Backend::Gemini,
            system_prompt: Some("Answer in French.".to_string()),
            ..Config::default()
        };
        let bots = Bots::from_credentials(&Credentials::default(), &config).unwrap();

        let adapter = bots.adapter(&config);

        assert_eq!(adapter.backend(), Backend::Gemini);
        assert_eq!(adapter.model(), "gemini-2.0-flash");
        assert_eq!(adapter.system(), "Answer in French.");
        assert!(adapter.messages().is_empty());
    }

    #[test]
    fn adapters_do_not_share_conversations() {
        let config = Config::default();
        let bots = Bots::from_credentials(&Credentials::default(), &config).unwrap();

        let mut first = bots.adapter(&config);
        let second = bots.adapter(&config);
        first.push(crate::adapters::llm::Message::user("only mine"));

        assert_eq!(first.messages().len(), 1);
        assert!(second.messages().is_empty());
    }
}
