//! Parallel summarisation orchestrator.
//!
//! One overview task and one task per module are spawned up front on the tokio
//! runtime. A semaphore sized to the key pool bounds how many provider calls are
//! in flight. Each task owns its retry loop:
//!
//! ```text
//! PENDING -> RUNNING -> SUCCEEDED
//!                    -> RATE_LIMITED -> (backoff) -> RUNNING    while attempts remain
//!                    -> FAILED                                  any other error, or attempts exhausted
//! ```
//!
//! A failed task yields an error-marker string in place of its summary; siblings
//! are never cancelled. The permit is released while a task sleeps through its
//! backoff, so a throttled key does not hold a worker slot idle.

use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::aggregate::OverviewInput;
use crate::config::OrchestrateConfig;
use crate::contract::{ModuleTask, ProviderFactory};
use crate::error::ProviderError;
use crate::providers::{ApiKey, ApiKeyPool};

pub const OVERVIEW_SYSTEM_PROMPT: &str = "You are a principal software architect writing the opening page of a code wiki.
Produce a HIGH-LEVEL ARCHITECTURAL OVERVIEW of the repository described by the module map.

OVERVIEW:
[At least three substantial paragraphs surveying the whole repository: the technology stack, the structural patterns, and the core purpose of the system.]

Guidelines:
1. Be thorough and technically dense.
2. Write at staff-engineer depth: state management, concurrency, data flow and scalability.";

pub const MODULE_SYSTEM_PROMPT: &str = "You are a senior technical writer turning extracted logic snippets from ONE module into a wiki section.

Use exactly this output format:
MODULE: [Product-oriented name for this part of the system]
[A substantial summary of the module's role in the architecture.]

SUBSECTION: [A specific component or piece of logic]
[How it works, why it is built this way, and what it depends on.]
```[language]
// the most important code fragment
```

Guidelines:
1. Be thorough and technically dense.
2. Focus on data flow and modularity.";

/// Lifecycle of a single summarisation task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    RateLimited,
    Succeeded,
    Failed,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Pending => "PENDING",
            TaskState::Running => "RUNNING",
            TaskState::RateLimited => "RATE_LIMITED",
            TaskState::Succeeded => "SUCCEEDED",
            TaskState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskKind {
    Overview,
    Module(String),
}

impl TaskKind {
    fn label(&self) -> &str {
        match self {
            TaskKind::Overview => "Overview",
            TaskKind::Module(name) => name,
        }
    }

    fn error_marker(&self, message: &str) -> String {
        match self {
            TaskKind::Overview => format!("Error generating overview: {message}"),
            TaskKind::Module(name) => format!("Error generating module {name}: {message}"),
        }
    }
}

/// Final result of one task: the provider text, or an error marker.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub text: String,
    pub attempts: u32,
    pub state: TaskState,
}

impl TaskOutcome {
    pub fn succeeded(&self) -> bool {
        self.state == TaskState::Succeeded
    }
}

/// Outcomes in assembly order: overview first, modules in aggregation order.
#[derive(Debug, Clone, PartialEq)]
pub struct Summaries {
    pub overview: TaskOutcome,
    pub modules: Vec<(String, TaskOutcome)>,
}

impl Summaries {
    pub fn all_succeeded(&self) -> bool {
        self.overview.succeeded() && self.modules.iter().all(|(_, o)| o.succeeded())
    }
}

struct SummaryJob {
    kind: TaskKind,
    system: &'static str,
    user: String,
    key: ApiKey,
}

pub struct Orchestrator<P> {
    pool: Arc<ApiKeyPool>,
    factory: Arc<P>,
    config: OrchestrateConfig,
}

impl<P> Orchestrator<P>
where
    P: ProviderFactory + 'static,
{
    pub fn new(pool: ApiKeyPool, factory: P, config: OrchestrateConfig) -> Self {
        Self {
            pool: Arc::new(pool),
            factory: Arc::new(factory),
            config,
        }
    }

    pub fn pool(&self) -> &ApiKeyPool {
        &self.pool
    }

    /// Worker slots: one per key, or the configured default for an empty pool.
    pub fn parallelism(&self) -> usize {
        if self.pool.is_empty() {
            self.config.default_parallelism.max(1)
        } else {
            self.pool.len()
        }
    }

    /// Fan out the overview and every module task, then collect in order.
    pub async fn run(&self, overview: &OverviewInput, tasks: &[ModuleTask]) -> Summaries {
        let semaphore = Arc::new(Semaphore::new(self.parallelism()));
        info!(
            keys = self.pool.len(),
            parallelism = self.parallelism(),
            modules = tasks.len(),
            "Generating summaries in parallel"
        );

        let overview_handle = self.spawn(
            SummaryJob {
                kind: TaskKind::Overview,
                system: OVERVIEW_SYSTEM_PROMPT,
                user: format!(
                    "Repository Info:\n{}\n\nModules Map:\n{}",
                    overview.repo_info, overview.modules_map
                ),
                key: self.pool.first().clone(),
            },
            Arc::clone(&semaphore),
        );

        let module_handles: Vec<(TaskKind, JoinHandle<TaskOutcome>)> = tasks
            .iter()
            .enumerate()
            .map(|(i, task)| {
                let kind = TaskKind::Module(task.module.clone());
                let handle = self.spawn(
                    SummaryJob {
                        kind: kind.clone(),
                        system: MODULE_SYSTEM_PROMPT,
                        user: format!("Logic Extracts for Module: {}\n\n{}", task.module, task.text),
                        key: self.pool.round_robin(i).clone(),
                    },
                    Arc::clone(&semaphore),
                );
                (kind, handle)
            })
            .collect();

        let overview = settle(&TaskKind::Overview, overview_handle.await);

        let (kinds, handles): (Vec<TaskKind>, Vec<JoinHandle<TaskOutcome>>) =
            module_handles.into_iter().unzip();
        let modules = kinds
            .into_iter()
            .zip(join_all(handles).await)
            .map(|(kind, joined)| {
                let outcome = settle(&kind, joined);
                (kind.label().to_string(), outcome)
            })
            .collect::<Vec<_>>();

        let failed = modules.iter().filter(|(_, o)| !o.succeeded()).count();
        info!(
            overview_ok = overview.succeeded(),
            modules = modules.len(),
            failed,
            "Parallel generation complete"
        );
        Summaries { overview, modules }
    }

    fn spawn(&self, job: SummaryJob, semaphore: Arc<Semaphore>) -> JoinHandle<TaskOutcome> {
        debug!(task = %job.kind.label(), key = ?job.key, state = %TaskState::Pending, "Task submitted");
        let factory = Arc::clone(&self.factory);
        let config = self.config.clone();
        tokio::spawn(run_with_retry(factory, job, semaphore, config))
    }
}

fn settle(kind: &TaskKind, joined: Result<TaskOutcome, JoinError>) -> TaskOutcome {
    joined.unwrap_or_else(|e| {
        error!(task = %kind.label(), error = %e, "Summarisation task aborted");
        TaskOutcome {
            text: kind.error_marker(&format!("task aborted: {e}")),
            attempts: 0,
            state: TaskState::Failed,
        }
    })
}

async fn run_with_retry<P: ProviderFactory>(
    factory: Arc<P>,
    job: SummaryJob,
    semaphore: Arc<Semaphore>,
    config: OrchestrateConfig,
) -> TaskOutcome {
    let max_attempts = config.max_attempts.max(1);
    let label = job.kind.label().to_string();
    let mut attempt = 0;

    loop {
        attempt += 1;
        let result = match semaphore.acquire().await {
            Ok(_permit) => {
                debug!(task = %label, attempt, state = %TaskState::Running, "Calling provider");
                let provider = factory.provider_for(&job.key);
                provider.complete(job.system, &job.user).await
            }
            Err(e) => Err(ProviderError::Network(format!("worker pool closed: {e}"))),
        };

        match result {
            Ok(text) => {
                debug!(task = %label, attempt, state = %TaskState::Succeeded, chars = text.len(), "Task finished");
                return TaskOutcome {
                    text,
                    attempts: attempt,
                    state: TaskState::Succeeded,
                };
            }
            Err(e) if e.is_rate_limited() && attempt < max_attempts => {
                warn!(
                    task = %label,
                    attempt,
                    max_attempts,
                    backoff_secs = config.backoff().as_secs_f64(),
                    state = %TaskState::RateLimited,
                    "Rate limit hit, waiting before retry"
                );
                tokio::time::sleep(config.backoff()).await;
            }
            Err(e) => {
                error!(task = %label, attempt, error = %e, state = %TaskState::Failed, "Task failed");
                return TaskOutcome {
                    text: job.kind.error_marker(&e.to_string()),
                    attempts: attempt,
                    state: TaskState::Failed,
                };
            }
        }
    }
}
