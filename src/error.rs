//! Error taxonomy for the wiki pipeline.
//!
//! - [`RepositoryError`] is fatal: nothing downstream runs without a snapshot.
//! - [`ProviderError`] never escapes the orchestrator; it is rendered into the
//!   failing task's section instead.
//! - [`ConfigError`] is raised while building the key pool or reading YAML.

use thiserror::Error;

/// Failures of the repository materializer.
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Git is not installed or not in PATH")]
    ToolUnavailable,

    #[error("Git clone timed out after {secs}s; the repository may be too large or the connection is slow")]
    Timeout { secs: u64 },

    #[error("Git clone failed: {0}")]
    CloneFailed(String),

    #[error("No code files found in repository")]
    NoEligibleFiles,

    #[error("Invalid repository reference: {0:?}")]
    InvalidReference(String),

    #[error("I/O error while reading repository: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures reported by an LLM provider call.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Rate limit exceeded (429){}", .retry_after_ms.map(|ms| format!(", retry after {}ms", ms)).unwrap_or_default())]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Map a non-success HTTP status and body to an error variant.
    pub fn from_http_status(status: u16, body: &str) -> Self {
        match status {
            429 => ProviderError::RateLimited {
                retry_after_ms: extract_retry_after(body),
            },
            401 | 403 => ProviderError::Authentication(body.to_string()),
            _ => ProviderError::Http {
                status,
                body: body.to_string(),
            },
        }
    }

    /// True when the error carries a throttling signature.
    ///
    /// Providers are not consistent about status codes, so the rendered
    /// message is also checked for "rate limit" or "429".
    pub fn is_rate_limited(&self) -> bool {
        if matches!(self, ProviderError::RateLimited { .. }) {
            return true;
        }
        let text = self.to_string().to_lowercase();
        text.contains("rate limit") || text.contains("429")
    }
}

fn extract_retry_after(body: &str) -> Option<u64> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    let secs = json
        .get("error")
        .and_then(|e| e.get("retry_after"))
        .and_then(|v| v.as_f64())?;
    Some((secs * 1000.0) as u64)
}

/// Configuration problems detected before the pipeline starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No API keys found in environment; set GROQ_API_KEY(S) or GOOGLE_API_KEY")]
    NoApiKeys,

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level error of a wiki generation run.
#[derive(Error, Debug)]
pub enum WikiError {
    #[error("Failed to fetch repository: {0}")]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to initialise provider client: {0}")]
    ProviderSetup(#[from] ProviderError),
}
