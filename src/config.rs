use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::adapters::llm::{Backend, ModelConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_backend")]
    pub backend: Backend,

    pub model: Option<String>,

    pub system_prompt: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    pub timeout_secs: Option<u64>,

    #[serde(default)]
    pub base_urls: BaseUrls,
}

/// Per-backend endpoint overrides. Unset entries use the backend's default.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct BaseUrls {
    pub openai: Option<String>,
    pub claude: Option<String>,
    pub gemini: Option<String>,
    pub ollama: Option<String>,
}

impl BaseUrls {
    pub fn get(&self, backend: Backend) -> Option<&str> {
        match backend {
            Backend::OpenAi => self.openai.as_deref(),
            Backend::Claude => self.claude.as_deref(),
            Backend::Gemini => self.gemini.as_deref(),
            Backend::Ollama => self.ollama.as_deref(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            model: None,
            system_prompt: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: None,
            base_urls: BaseUrls::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        // Working directory first, then the home directory
        let mut candidates = vec![
            PathBuf::from(".polychat.yml"),
            PathBuf::from(".polychat.yaml"),
        ];
        if let Some(home_dir) = dirs::home_dir() {
            candidates.push(home_dir.join(".polychat.yml"));
        }

        for path in candidates {
            if path.exists() {
                return Self::load_from(&path);
            }
        }

        Ok(Config::default())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    pub fn merge_with_cli(
        &mut self,
        cli_backend: Option<Backend>,
        cli_model: Option<String>,
        cli_prompt: Option<String>,
    ) {
        if let Some(backend) = cli_backend {
            if backend != self.backend {
                // A model picked for another vendor would not resolve here
                self.model = None;
            }
            self.backend = backend;
        }
        if let Some(model) = cli_model {
            self.model = Some(model);
        }
        if let Some(prompt) = cli_prompt {
            self.system_prompt = Some(prompt);
        }
    }

    pub fn effective_model(&self) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| self.backend.default_model().to_string())
    }

    pub fn system_prompt(&self) -> &str {
        self.system_prompt.as_deref().unwrap_or_default()
    }

    /// Client settings for `backend`, carrying the given credential.
    pub fn model_config(&self, backend: Backend, api_key: Option<String>) -> ModelConfig {
        ModelConfig {
            api_key,
            base_url: self.base_urls.get(backend).map(str::to_string),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            timeout_secs: self.timeout_secs,
        }
    }
}

fn default_backend() -> Backend {
    Backend::OpenAi
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> usize {
    500
}
