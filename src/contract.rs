//! # contract: shared data model and collaborator seams
//!
//! Every stage of the pipeline speaks in the types defined here:
//!
//! - [`FileSnapshot`] is produced once by the materializer and read by everything after it.
//! - [`Module`] and [`ModuleTask`] are the aggregator's output and the orchestrator's input.
//! - [`WikiSection`] and [`WikiDocument`] are what the caller finally receives.
//!
//! ## Seams
//! - [`RepositoryFetcher`] wraps the shallow-clone tool (git in production).
//! - [`CompletionProvider`] is one LLM backend bound to one credential.
//! - [`ProviderFactory`] builds a fresh provider for a key on every attempt, so
//!   concurrent tasks never share a client.
//!
//! The async traits are annotated for `mockall`, so tests can script clones and
//! completions without network access.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;
use serde::{Deserialize, Serialize};

use crate::error::{ProviderError, RepositoryError};
use crate::providers::ApiKey;

/// Relative path -> UTF-8 file content. Sorted by path.
pub type FileSnapshot = BTreeMap<String, String>;

/// Metadata describing one materialized repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// The reference exactly as the caller supplied it.
    pub repo_url: String,
    /// Best-effort `owner/repo` slug.
    pub repo: String,
    /// Short revision of the cloned HEAD, when it could be resolved.
    pub commit: Option<String>,
    /// RFC 3339 UTC timestamp of the fetch.
    pub generated_at: String,
    pub file_count: usize,
}

/// A named group of files summarised together as one LLM context.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub name: String,
    pub files: BTreeMap<String, String>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            files: BTreeMap::new(),
        }
    }
}

/// Condensed, size-bounded text for one module, ready to send to a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleTask {
    pub module: String,
    pub text: String,
}

/// One node of the generated wiki.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WikiSection {
    pub id: String,
    pub title: String,
    pub content: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<WikiSection>>,
}

/// The caller-facing result of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WikiDocument {
    pub meta: SnapshotMeta,
    pub sections: Vec<WikiSection>,
    pub files_data: FileSnapshot,
}

/// Shallow-clone capable retrieval tool.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RepositoryFetcher: Send + Sync {
    /// Retrieve a single revision of `url` into `dest`, which must not exist yet.
    async fn shallow_clone(&self, url: &str, dest: &Path) -> Result<(), RepositoryError>;

    /// Short hash of HEAD inside `repo_dir`, or `None` when it cannot be resolved.
    async fn short_revision(&self, repo_dir: &Path) -> Option<String>;
}

/// A single LLM backend bound to one credential.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Return one text completion for a system and a user instruction.
    async fn complete(&self, system: &str, user: &str) -> Result<String, ProviderError>;
}

/// Builds a provider client for a key.
pub trait ProviderFactory: Send + Sync {
    fn provider_for(&self, key: &ApiKey) -> Box<dyn CompletionProvider>;
}

impl<F> ProviderFactory for F
where
    F: Fn(&ApiKey) -> Box<dyn CompletionProvider> + Send + Sync,
{
    fn provider_for(&self, key: &ApiKey) -> Box<dyn CompletionProvider> {
        self(key)
    }
}
