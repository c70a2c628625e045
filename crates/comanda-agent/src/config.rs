//! Orchestrator configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::memory::MemoryConfig;
use crate::order::CustomizationCatalog;

/// Retry configuration for provider calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay between retries, in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay between retries, in milliseconds
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 500,
            max_delay_ms: 8_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetrySettings {
    /// Calculate delay for a given attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_ms = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis(delay_ms.min(self.max_delay_ms as f64) as u64)
    }
}

/// Settings for the scheduler, pipeline stages and memory log
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Quiet period after the last message before a turn starts
    pub debounce_ms: u64,
    /// Messages closer together than this are dropped
    pub min_message_interval_ms: u64,
    pub llm_timeout_secs: u64,
    pub tool_timeout_secs: u64,
    pub send_timeout_secs: u64,
    /// Recent messages handed to the classifier
    pub history_window: usize,
    /// Sent once when a turn fails for an unexpected reason
    pub apology_message: String,
    pub memory: MemoryConfig,
    pub customizations: CustomizationCatalog,
    pub retry: RetrySettings,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 3_000,
            min_message_interval_ms: 250,
            llm_timeout_secs: 30,
            tool_timeout_secs: 15,
            send_timeout_secs: 10,
            history_window: 3,
            apology_message: "Sorry, something went wrong on our side. Could you send that again?"
                .to_string(),
            memory: MemoryConfig::default(),
            customizations: CustomizationCatalog::default(),
            retry: RetrySettings::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn min_message_interval(&self) -> Duration {
        Duration::from_millis(self.min_message_interval_ms)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}
