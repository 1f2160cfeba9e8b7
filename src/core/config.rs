//! Configuration management

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::errors::{Result, TranslationError};

/// Configuration for translator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslatorConfig {
    pub api_key: String,
    pub api_base: String,
    /// Model used for extraction and drafting
    pub chat_model: String,
    /// Model used for critique and polish
    pub reasoner_model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub max_concurrent: usize,
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub request_timeout_ms: u64,
    /// Upper bound on characters per translation unit
    pub max_unit_chars: usize,
    /// Segments shorter than this are not sent for term extraction
    pub min_extract_chars: usize,
    pub save_after_each_file: bool,
    pub mark_fallbacks: bool,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: "https://api.deepseek.com/v1".to_string(),
            chat_model: "deepseek-chat".to_string(),
            reasoner_model: "deepseek-reasoner".to_string(),
            max_tokens: 8192,
            temperature: 1.3,
            max_concurrent: 4,
            max_attempts: 3,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 30_000,
            request_timeout_ms: 180_000,
            max_unit_chars: 4000,
            min_extract_chars: 30,
            save_after_each_file: true,
            mark_fallbacks: false,
        }
    }
}

/// Legacy variable names and the keys they override
const LEGACY_ENV: &[(&str, &str)] = &[
    ("DEEPSEEK_API_KEY", "api_key"),
    ("DEEPSEEK_API_BASE", "api_base"),
    ("MODEL_NAME", "chat_model"),
    ("REASONER_MODEL_NAME", "reasoner_model"),
    ("MAX_TOKENS", "max_tokens"),
];

impl TranslatorConfig {
    /// Load defaults, then an optional TOML file, then `TRANSLATOR_*` and
    /// legacy environment variables
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let defaults = Self::default();
        let mut builder = Config::builder()
            .set_default("api_key", defaults.api_key)?
            .set_default("api_base", defaults.api_base)?
            .set_default("chat_model", defaults.chat_model)?
            .set_default("reasoner_model", defaults.reasoner_model)?
            .set_default("max_tokens", i64::from(defaults.max_tokens))?
            .set_default("temperature", f64::from(defaults.temperature))?
            .set_default("max_concurrent", defaults.max_concurrent as i64)?
            .set_default("max_attempts", i64::from(defaults.max_attempts))?
            .set_default("retry_base_delay_ms", defaults.retry_base_delay_ms as i64)?
            .set_default("retry_max_delay_ms", defaults.retry_max_delay_ms as i64)?
            .set_default("request_timeout_ms", defaults.request_timeout_ms as i64)?
            .set_default("max_unit_chars", defaults.max_unit_chars as i64)?
            .set_default("min_extract_chars", defaults.min_extract_chars as i64)?
            .set_default("save_after_each_file", defaults.save_after_each_file)?
            .set_default("mark_fallbacks", defaults.mark_fallbacks)?;

        if let Some(path) = file {
            if !path.exists() {
                return Err(TranslationError::FileError {
                    path: path.display().to_string(),
                    message: "config file not found".to_string(),
                });
            }
            debug!("Loading config file {}", path.display());
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(Environment::with_prefix("TRANSLATOR"));

        for (var, key) in LEGACY_ENV {
            if let Ok(value) = std::env::var(var) {
                builder = builder.set_override(*key, value)?;
            }
        }

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(TranslationError::config(
                "API key is required (set DEEPSEEK_API_KEY or TRANSLATOR_API_KEY)",
            ));
        }

        if self.api_base.trim().is_empty() {
            return Err(TranslationError::config("API base URL is required"));
        }

        if self.max_concurrent == 0 {
            return Err(TranslationError::config("max_concurrent must be greater than 0"));
        }

        if self.max_attempts == 0 {
            return Err(TranslationError::config("max_attempts must be greater than 0"));
        }

        if self.max_tokens == 0 {
            return Err(TranslationError::config("max_tokens must be greater than 0"));
        }

        if self.max_unit_chars == 0 {
            return Err(TranslationError::config("max_unit_chars must be greater than 0"));
        }

        if self.max_concurrent > 16 {
            warn!(
                "max_concurrent = {} is high for a single API key, expect rate limiting",
                self.max_concurrent
            );
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
