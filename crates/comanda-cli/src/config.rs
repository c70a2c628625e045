//! Configuration file support

use comanda_agent::OrchestratorConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Configuration for comanda
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Model to use
    pub model: Option<String>,
    /// Base URL of an OpenAI-compatible API
    pub base_url: Option<String>,
    /// API key (alternative to the OPENAI_API_KEY environment variable)
    pub api_key: Option<String>,
    /// Scheduler, pipeline and memory settings
    pub orchestrator: OrchestratorConfig,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("comanda")
    }

    /// Get the config file path: explicit path, then COMANDA_CONFIG_PATH, then the config dir
    pub fn config_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        if let Ok(path) = std::env::var("COMANDA_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file, falling back to defaults when it is missing
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Write the example config if no file exists yet
    pub fn init(path: &Path) -> std::io::Result<PathBuf> {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, example_config())?;
        Ok(path.to_path_buf())
    }

    /// API key from config, then OPENAI_API_KEY
    pub fn api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
    }

    pub fn model_id(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# comanda configuration file
# Place at ~/.config/comanda/config.toml (Linux), or point COMANDA_CONFIG_PATH at it

# Model served by an OpenAI-compatible chat-completions API
model = "gpt-4o-mini"
base_url = "https://api.openai.com/v1"

# API key (optional - OPENAI_API_KEY is used when unset)
# api_key = "sk-..."

[orchestrator]
# Quiet period before a burst of messages becomes one turn
debounce_ms = 3000
# Messages closer together than this are dropped
min_message_interval_ms = 250
llm_timeout_secs = 30
tool_timeout_secs = 15
send_timeout_secs = 10
# Recent messages handed to the intent classifier
history_window = 3
apology_message = "Sorry, something went wrong on our side. Could you send that again?"

[orchestrator.memory]
max_messages = 50
founding_messages = 5
similarity_threshold = 0.85
similarity_window = 5
ttl_secs = 86400

[orchestrator.retry]
max_retries = 2
initial_delay_ms = 500
max_delay_ms = 8000
backoff_multiplier = 2.0

# Border and addition surcharges
[[orchestrator.customizations.borders]]
name = "catupiry"
surcharge = "8.00"

[[orchestrator.customizations.borders]]
name = "cheddar"
surcharge = "8.00"

[[orchestrator.customizations.additions]]
name = "bacon"
surcharge = "5.00"

[[orchestrator.customizations.additions]]
name = "extra cheese"
surcharge = "4.00"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_example_config_parses() {
        let config = Config::parse(example_config()).unwrap();
        assert_eq!(config.model_id(), "gpt-4o-mini");
        assert_eq!(config.orchestrator.debounce_ms, 3000);
        assert_eq!(config.orchestrator.retry.max_retries, 2);
        let catupiry = config.orchestrator.customizations.border("Catupiry").unwrap();
        assert_eq!(catupiry.surcharge, Decimal::new(800, 2));
        assert_eq!(config.orchestrator.customizations.additions.len(), 2);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = Config::parse("model = \"llama3\"\n[orchestrator]\ndebounce_ms = 1000\n").unwrap();
        assert_eq!(config.model_id(), "llama3");
        assert_eq!(config.base_url(), DEFAULT_BASE_URL);
        assert_eq!(config.orchestrator.debounce_ms, 1000);
        assert_eq!(config.orchestrator.history_window, 3);
        assert_eq!(config.orchestrator.memory.max_messages, 50);
    }

    #[test]
    fn test_config_key_wins() {
        let config = Config {
            api_key: Some("sk-test".into()),
            ..Default::default()
        };
        assert_eq!(config.api_key().as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_explicit_path_wins() {
        let path = Config::config_path(Some(Path::new("/tmp/comanda.toml")));
        assert_eq!(path, PathBuf::from("/tmp/comanda.toml"));
    }

    #[test]
    fn test_missing_file_is_default() {
        let config = Config::load(Path::new("/nonexistent/comanda/config.toml")).unwrap();
        assert!(config.model.is_none());
    }
}
