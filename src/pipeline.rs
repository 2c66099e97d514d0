//! # pipeline: one wiki generation run, end to end
//!
//! `WikiGenerator::generate` drives the stages in order:
//!
//! 1. normalize the reference and consult the injected [`WikiCache`];
//! 2. materialize a [`FileSnapshot`](crate::contract::FileSnapshot) (fatal on failure);
//! 3. aggregate modules and build one bounded task per module;
//! 4. fan the overview and module tasks out to the providers;
//! 5. assemble the sections and, when every task succeeded, store the document
//!    in the cache.
//!
//! Every run executes inside an `info_span!("generate_wiki", run_id = ..)`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::aggregate::{aggregate_modules, build_module_tasks, build_overview_input};
use crate::assemble::assemble;
use crate::cache::{MemoryCache, NoCache, WikiCache};
use crate::config::{AggregateConfig, ProviderSettings, WikiConfig};
use crate::contract::{ProviderFactory, RepositoryFetcher, WikiDocument};
use crate::download::{normalize_repo_url, GitCli, Materializer};
use crate::error::WikiError;
use crate::orchestrate::Orchestrator;
use crate::preprocess::StructureExtractor;
use crate::providers::{ApiKeyPool, HttpProviderFactory};

pub struct WikiGenerator<F, P> {
    materializer: Materializer<F>,
    extractor: StructureExtractor,
    aggregate: AggregateConfig,
    orchestrator: Orchestrator<P>,
    cache: Arc<dyn WikiCache>,
}

impl WikiGenerator<GitCli, HttpProviderFactory> {
    /// Production wiring: git on PATH, HTTP providers, in-memory cache.
    pub fn from_settings(
        config: &WikiConfig,
        settings: &ProviderSettings,
    ) -> Result<Self, WikiError> {
        let pool = ApiKeyPool::from_settings(settings)?;
        let factory = HttpProviderFactory::new(
            settings,
            config.orchestrate.request_timeout(),
            config.orchestrate.temperature,
        )?;
        let cache = MemoryCache::new(
            Duration::from_secs(config.cache.ttl_secs),
            config.cache.capacity,
        );
        Ok(Self::new(GitCli::new(&config.materialize), factory, pool, config)
            .with_cache(Arc::new(cache)))
    }
}

impl<F, P> WikiGenerator<F, P>
where
    F: RepositoryFetcher,
    P: ProviderFactory + 'static,
{
    /// A generator without caching.
    pub fn new(fetcher: F, factory: P, pool: ApiKeyPool, config: &WikiConfig) -> Self {
        Self {
            materializer: Materializer::new(fetcher, config.materialize.clone()),
            extractor: StructureExtractor::new(config.extract.clone()),
            aggregate: config.aggregate.clone(),
            orchestrator: Orchestrator::new(pool, factory, config.orchestrate.clone()),
            cache: Arc::new(NoCache),
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn WikiCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn without_cache(self) -> Self {
        self.with_cache(Arc::new(NoCache))
    }

    /// Generate the wiki for `reference` (URL or `owner/repo`).
    ///
    /// Only materialization failures are returned as errors; provider failures
    /// show up as error text inside the affected sections.
    pub async fn generate(&self, reference: &str) -> Result<WikiDocument, WikiError> {
        let span = info_span!("generate_wiki", run_id = %Uuid::new_v4(), repo = %reference);
        self.generate_inner(reference).instrument(span).await
    }

    async fn generate_inner(&self, reference: &str) -> Result<WikiDocument, WikiError> {
        let cache_key = normalize_repo_url(reference)?;
        if let Some(mut document) = self.cache.get(&cache_key) {
            info!(repo_url = %cache_key, "Serving wiki from cache");
            document.meta.repo_url = reference.to_string();
            return Ok(document);
        }

        let (files, meta) = self.materializer.materialize(reference).await.map_err(|e| {
            error!(repo_url = %cache_key, error = %e, "Repository materialization failed");
            WikiError::Repository(e)
        })?;

        let modules = aggregate_modules(&files, &self.aggregate);
        let tasks = build_module_tasks(&modules, &self.extractor, &self.aggregate);
        let overview_input = build_overview_input(&files, &meta, &tasks, &self.aggregate);
        info!(
            repo = %meta.repo,
            files = files.len(),
            modules = tasks.len(),
            "Prepared module tasks"
        );

        let summaries = self.orchestrator.run(&overview_input, &tasks).await;
        let sections = assemble(
            &summaries.overview.text,
            summaries
                .modules
                .iter()
                .map(|(name, outcome)| (name.as_str(), outcome.text.as_str())),
        );

        let document = WikiDocument {
            meta,
            sections,
            files_data: files,
        };
        if summaries.all_succeeded() {
            self.cache.insert(&cache_key, document.clone());
        } else {
            warn!(repo_url = %cache_key, "Some summaries failed, result not cached");
        }
        info!(sections = document.sections.len(), "Wiki generated");
        Ok(document)
    }
}
