use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::ConfigError;

/// Upper bound for the rate-limit backoff: one day.
pub const MAX_BACKOFF_SECS: f64 = 86_400.0;

/// Pipeline configuration. Every field has a default, so an empty YAML
/// document (or no file at all) yields a working setup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WikiConfig {
    pub materialize: MaterializeConfig,
    pub extract: ExtractConfig,
    pub aggregate: AggregateConfig,
    pub orchestrate: OrchestrateConfig,
    pub cache: CacheConfig,
}

impl WikiConfig {
    pub fn trace_loaded(&self) {
        info!(
            max_files = self.materialize.max_files,
            max_attempts = self.orchestrate.max_attempts,
            backoff_secs = self.orchestrate.rate_limit_backoff_secs,
            "Loaded WikiConfig"
        );
        debug!(?self, "WikiConfig loaded (full debug)");
    }

    /// Reject values that deserialize fine but cannot drive a run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let backoff = self.orchestrate.rate_limit_backoff_secs;
        if !backoff.is_finite() || !(0.0..=MAX_BACKOFF_SECS).contains(&backoff) {
            return Err(ConfigError::Invalid(format!(
                "orchestrate.rate_limit_backoff_secs must be between 0 and {MAX_BACKOFF_SECS}, got {backoff}"
            )));
        }
        if self.orchestrate.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "orchestrate.max_attempts must be at least 1".to_string(),
            ));
        }
        if !self.orchestrate.temperature.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "orchestrate.temperature must be finite, got {}",
                self.orchestrate.temperature
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterializeConfig {
    pub max_files: usize,
    pub max_file_bytes: u64,
    pub clone_timeout_secs: u64,
    pub revision_timeout_secs: u64,
    /// File extensions (without the dot) that count as source code.
    pub extensions: Vec<String>,
    /// Path components that exclude a file or prune a directory.
    pub ignore: Vec<String>,
}

impl Default for MaterializeConfig {
    fn default() -> Self {
        Self {
            max_files: 40,
            max_file_bytes: 50_000,
            clone_timeout_secs: 120,
            revision_timeout_secs: 10,
            extensions: ["py", "js", "ts", "tsx", "jsx", "java", "go", "cpp", "h", "cs"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ignore: [
                ".git",
                ".github",
                "node_modules",
                "venv",
                "__pycache__",
                "dist",
                "build",
                ".env",
                "package-lock.json",
                "yarn.lock",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Below this many signatures a file gets a density excerpt as well.
    pub signature_threshold: usize,
    /// Signatures kept for signature-rich files.
    pub signature_cap: usize,
    /// Lines kept in the density excerpt.
    pub excerpt_lines: usize,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            signature_threshold: 10,
            signature_cap: 25,
            excerpt_lines: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateConfig {
    pub root_recluster_threshold: usize,
    pub files_per_module: usize,
    pub max_module_chars: usize,
    pub overview_path_sample: usize,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            root_recluster_threshold: 15,
            files_per_module: 7,
            max_module_chars: 20_000,
            overview_path_sample: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrateConfig {
    /// Total attempts per task, first call included.
    pub max_attempts: u32,
    pub rate_limit_backoff_secs: f64,
    /// Worker count used when the key pool is empty.
    pub default_parallelism: usize,
    pub request_timeout_secs: u64,
    pub temperature: f32,
}

impl OrchestrateConfig {
    /// Clamped to `0..=MAX_BACKOFF_SECS`; NaN counts as zero.
    pub fn backoff(&self) -> Duration {
        let secs = self.rate_limit_backoff_secs;
        if secs.is_nan() {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(secs.clamp(0.0, MAX_BACKOFF_SECS))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for OrchestrateConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            rate_limit_backoff_secs: 90.0,
            default_parallelism: 5,
            request_timeout_secs: 120,
            temperature: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            capacity: 32,
        }
    }
}

/// Provider credentials and model names, sourced from the environment.
#[derive(Clone, PartialEq)]
pub struct ProviderSettings {
    pub groq_keys: Vec<String>,
    pub gemini_keys: Vec<String>,
    pub groq_model: String,
    pub gemini_model: String,
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("groq_keys", &self.groq_keys.len())
            .field("gemini_keys", &self.gemini_keys.len())
            .field("groq_model", &self.groq_model)
            .field("gemini_model", &self.gemini_model)
            .finish()
    }
}

pub const DEFAULT_GROQ_MODEL: &str = "llama-3.3-70b-versatile";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            groq_keys: Vec::new(),
            gemini_keys: Vec::new(),
            groq_model: DEFAULT_GROQ_MODEL.to_string(),
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
        }
    }
}

impl ProviderSettings {
    /// Groq keys first, then Gemini keys.
    pub fn all_keys(&self) -> Vec<String> {
        self.groq_keys
            .iter()
            .chain(self.gemini_keys.iter())
            .cloned()
            .collect()
    }
}

/// Split a comma-separated credential list, dropping blank entries.
pub fn split_key_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}
