use crate::config::{split_key_list, ProviderSettings, WikiConfig, DEFAULT_GEMINI_MODEL, DEFAULT_GROQ_MODEL};
use crate::error::ConfigError;
use anyhow::Result;
use std::env;
use std::fs;
use std::path::Path;
use tracing::{error, info, warn};

/// Loads the pipeline configuration from an optional YAML file. A missing path
/// or an empty document yields the defaults.
pub fn load_config(path: Option<&Path>) -> Result<WikiConfig> {
    let Some(path_ref) = path else {
        info!("No config file given, using defaults");
        return Ok(WikiConfig::default());
    };
    info!(config_path = ?path_ref, "Loading configuration from file");

    let content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(ConfigError::Read {
                path: path_ref.display().to_string(),
                source: e,
            }
            .into());
        }
    };

    if content.trim().is_empty() {
        warn!(config_path = ?path_ref, "Config file is empty, using defaults");
        return Ok(WikiConfig::default());
    }

    let config: WikiConfig = match serde_yaml::from_str(&content) {
        Ok(conf) => conf,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(ConfigError::Parse(e).into());
        }
    };
    if let Err(e) = config.validate() {
        error!(error = %e, config_path = ?path_ref, "Config values out of range");
        return Err(e.into());
    }
    config.trace_loaded();
    Ok(config)
}

/// Reads provider credentials and model overrides from the environment.
///
/// `GROQ_API_KEYS` takes precedence over `GROQ_API_KEY`; `GOOGLE_API_KEY` may
/// also hold a comma-separated list. Fails when no key is present at all.
pub fn load_provider_settings() -> Result<ProviderSettings> {
    let groq_raw = env::var("GROQ_API_KEYS")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .or_else(|| env::var("GROQ_API_KEY").ok())
        .unwrap_or_default();
    let gemini_raw = env::var("GOOGLE_API_KEY").unwrap_or_default();

    let settings = ProviderSettings {
        groq_keys: split_key_list(&groq_raw),
        gemini_keys: split_key_list(&gemini_raw),
        groq_model: env_or("GROQ_MODEL", DEFAULT_GROQ_MODEL),
        gemini_model: env_or("GEMINI_MODEL", DEFAULT_GEMINI_MODEL),
    };

    if settings.groq_keys.is_empty() && settings.gemini_keys.is_empty() {
        error!("No provider API keys found in environment");
        return Err(ConfigError::NoApiKeys.into());
    }

    info!(
        groq_keys = settings.groq_keys.len(),
        gemini_keys = settings.gemini_keys.len(),
        groq_model = %settings.groq_model,
        gemini_model = %settings.gemini_model,
        "Provider settings loaded from env"
    );
    Ok(settings)
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}
