//! Team configuration.
//!
//! Loaded from an optional TOML file; CLI flags override individual values.
//!
//! ```toml
//! [llm]
//! provider = "openai"
//! base_url = "https://dashscope.aliyuncs.com/compatible-mode/v1"
//! model = "qwen-turbo"
//!
//! [roles.coder]
//! temperature = 0.2
//!
//! [pipeline]
//! output_dir = "out/calculator"
//! ecosystem = "dotnet"
//! repair = true
//!
//! [build]
//! dotnet_timeout_secs = 300
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::build::BuildSettings;
use crate::factory::{prompts, Roles};
use crate::llm::{Backend, ChatCompletionsClient, GenerationSettings, Generate, LlmClient, RoleGenerator};
use crate::project::{AssembleOptions, Ecosystem};
use crate::repair::DEFAULT_MAX_ITERATIONS;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("can't read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("bad config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("no API key (use --api-key, AGENT_TEAM_API_KEY, ANTHROPIC_API_KEY or [llm] api_key)")]
    MissingApiKey,
    #[error("provider 'openai' needs [llm] base_url")]
    MissingBaseUrl,
    #[error("invalid {field}: {reason}")]
    Invalid { field: String, reason: String },
}

// ── [llm] ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Anthropic Messages API.
    #[default]
    Anthropic,
    /// Any OpenAI-compatible `/chat/completions` endpoint.
    OpenAi,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: Provider,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
}

// ── [roles] ────────────────────────────────────────────────────────

/// Per-role generation settings. An empty `system` falls back to the
/// role's built-in prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RolesConfig {
    pub planner: GenerationSettings,
    pub coder: GenerationSettings,
    pub tester: GenerationSettings,
    pub reviewer: GenerationSettings,
}

fn role(system: &str, temperature: f32) -> GenerationSettings {
    GenerationSettings {
        system: system.to_string(),
        temperature,
        ..Default::default()
    }
}

impl Default for RolesConfig {
    fn default() -> Self {
        Self {
            planner: role(prompts::PLANNER_SYSTEM, 0.7),
            coder: role(prompts::CODER_SYSTEM, 0.3),
            tester: role(prompts::TESTER_SYSTEM, 0.5),
            reviewer: role(prompts::REVIEWER_SYSTEM, 0.4),
        }
    }
}

impl RolesConfig {
    fn fill_system_prompts(&mut self) {
        for (settings, system) in [
            (&mut self.planner, prompts::PLANNER_SYSTEM),
            (&mut self.coder, prompts::CODER_SYSTEM),
            (&mut self.tester, prompts::TESTER_SYSTEM),
            (&mut self.reviewer, prompts::REVIEWER_SYSTEM),
        ] {
            if settings.system.trim().is_empty() {
                settings.system = system.to_string();
            }
        }
    }

    fn iter(&self) -> [(&'static str, &GenerationSettings); 4] {
        [
            ("planner", &self.planner),
            ("coder", &self.coder),
            ("tester", &self.tester),
            ("reviewer", &self.reviewer),
        ]
    }
}

// ── [pipeline] ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Materialize generated code here. Unset: text-only workflow.
    pub output_dir: Option<PathBuf>,
    /// Defaults to .NET when materializing.
    pub ecosystem: Option<Ecosystem>,
    /// Build once after writing the main sources.
    pub verify: bool,
    /// Build and repair until it compiles or the attempts run out.
    pub repair: bool,
    pub max_repair_iterations: u32,
    /// SQLite database receiving every final output.
    pub artifact_db: Option<PathBuf>,
    #[serde(flatten)]
    pub assemble: AssembleOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            ecosystem: None,
            verify: false,
            repair: false,
            max_repair_iterations: DEFAULT_MAX_ITERATIONS,
            artifact_db: None,
            assemble: AssembleOptions::default(),
        }
    }
}

// ── TeamConfig ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TeamConfig {
    pub llm: LlmConfig,
    pub roles: RolesConfig,
    pub pipeline: PipelineConfig,
    pub build: BuildSettings,
}

impl TeamConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    /// Parse TOML text; `origin` only labels errors.
    pub fn parse(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.roles.fill_system_prompts();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, settings) in self.roles.iter() {
            if !(0.0..=2.0).contains(&settings.temperature) {
                return Err(ConfigError::Invalid {
                    field: format!("roles.{name}.temperature"),
                    reason: format!("{} is outside 0.0..=2.0", settings.temperature),
                });
            }
            if settings.max_tokens == 0 {
                return Err(ConfigError::Invalid {
                    field: format!("roles.{name}.max_tokens"),
                    reason: "must be positive".to_string(),
                });
            }
        }
        if self.pipeline.max_repair_iterations == 0 {
            return Err(ConfigError::Invalid {
                field: "pipeline.max_repair_iterations".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// The configured model endpoint.
    pub fn backend(&self) -> Result<Arc<dyn Backend>, ConfigError> {
        let api_key = self
            .llm
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;
        let backend: Arc<dyn Backend> = match self.llm.provider {
            Provider::Anthropic => {
                let mut client = LlmClient::new(api_key);
                if let Some(url) = &self.llm.base_url {
                    client = client.with_base_url(url);
                }
                if let Some(model) = &self.llm.model {
                    client = client.with_model(model);
                }
                Arc::new(client)
            }
            Provider::OpenAi => {
                let url = self.llm.base_url.as_deref().ok_or(ConfigError::MissingBaseUrl)?;
                let mut client = ChatCompletionsClient::new(api_key, url);
                if let Some(model) = &self.llm.model {
                    client = client.with_model(model);
                }
                Arc::new(client)
            }
        };
        tracing::debug!(provider = ?self.llm.provider, model = ?self.llm.model, "Backend configured");
        Ok(backend)
    }

    /// One generator per role over a shared backend.
    pub fn roles(&self, backend: Arc<dyn Backend>) -> Roles {
        let bind = |settings: &GenerationSettings| -> Arc<dyn Generate> {
            Arc::new(RoleGenerator::new(backend.clone(), settings.clone()))
        };
        Roles {
            planner: bind(&self.roles.planner),
            coder: bind(&self.roles.coder),
            tester: bind(&self.roles.tester),
            reviewer: bind(&self.roles.reviewer),
        }
    }
}
