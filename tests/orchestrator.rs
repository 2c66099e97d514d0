use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use repo_wiki::aggregate::OverviewInput;
use repo_wiki::config::OrchestrateConfig;
use repo_wiki::contract::{CompletionProvider, MockCompletionProvider, ModuleTask};
use repo_wiki::error::ProviderError;
use repo_wiki::orchestrate::{Orchestrator, TaskState};
use repo_wiki::providers::{ApiKey, ApiKeyPool};

fn fast_config() -> OrchestrateConfig {
    OrchestrateConfig {
        rate_limit_backoff_secs: 0.001,
        ..OrchestrateConfig::default()
    }
}

fn overview_input() -> OverviewInput {
    OverviewInput {
        repo_info: "Repository: owner/repo\nStructure (sample):\n- a.py".into(),
        modules_map: "- root".into(),
    }
}

fn tasks(names: &[&str]) -> Vec<ModuleTask> {
    names
        .iter()
        .map(|n| ModuleTask {
            module: n.to_string(),
            text: format!("### MODULE: {n}\n"),
        })
        .collect()
}

/// A factory whose providers all answer with `respond`, counting every call.
fn scripted<R>(
    calls: Arc<AtomicUsize>,
    respond: R,
) -> impl Fn(&ApiKey) -> Box<dyn CompletionProvider> + Send + Sync
where
    R: Fn(usize, &str) -> Result<String, ProviderError> + Send + Sync + Clone + 'static,
{
    move |_key: &ApiKey| {
        let calls = Arc::clone(&calls);
        let respond = respond.clone();
        let mut mock = MockCompletionProvider::new();
        mock.expect_complete()
            .returning(move |_system: &str, user: &str| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                respond(n, user)
            });
        Box::new(mock) as Box<dyn CompletionProvider>
    }
}

#[tokio::test]
async fn rate_limited_task_gets_three_attempts() {
    let calls = Arc::new(AtomicUsize::new(0));
    let factory = scripted(Arc::clone(&calls), |_, _| {
        Err(ProviderError::RateLimited { retry_after_ms: None })
    });
    let pool = ApiKeyPool::new(["gsk_one"]).unwrap();
    let orchestrator = Orchestrator::new(pool, factory, fast_config());

    let summaries = orchestrator.run(&overview_input(), &[]).await;

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(summaries.overview.attempts, 3);
    assert_eq!(summaries.overview.state, TaskState::Failed);
    assert!(summaries
        .overview
        .text
        .starts_with("Error generating overview: Rate limit exceeded (429)"));
}

#[tokio::test]
async fn textual_rate_limit_signature_is_retried() {
    let calls = Arc::new(AtomicUsize::new(0));
    let factory = scripted(Arc::clone(&calls), |n, _| {
        if n < 2 {
            Err(ProviderError::Network("Rate limit reached, please slow down".into()))
        } else {
            Ok("fine".into())
        }
    });
    let pool = ApiKeyPool::new(["AIza-key"]).unwrap();
    let orchestrator = Orchestrator::new(pool, factory, fast_config());

    let summaries = orchestrator.run(&overview_input(), &[]).await;
    assert_eq!(summaries.overview.text, "fine");
    assert_eq!(summaries.overview.attempts, 3);
    assert!(summaries.overview.succeeded());
}

#[tokio::test]
async fn other_errors_fail_without_retry() {
    let calls = Arc::new(AtomicUsize::new(0));
    let factory = scripted(Arc::clone(&calls), |_, user| {
        if user.starts_with("Repository Info:") {
            Ok("OVERVIEW:\nAll good.".into())
        } else {
            Err(ProviderError::Http {
                status: 500,
                body: "boom".into(),
            })
        }
    });
    let pool = ApiKeyPool::new(["gsk_one"]).unwrap();
    let orchestrator = Orchestrator::new(pool, factory, fast_config());

    let summaries = orchestrator.run(&overview_input(), &tasks(&["utils"])).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(summaries.overview.succeeded());
    let (name, outcome) = &summaries.modules[0];
    assert_eq!(name, "utils");
    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.state, TaskState::Failed);
    assert_eq!(outcome.text, "Error generating module utils: HTTP 500: boom");
}

#[tokio::test]
async fn one_failure_does_not_cancel_siblings() {
    let calls = Arc::new(AtomicUsize::new(0));
    let factory = scripted(Arc::clone(&calls), |_, user| {
        if user.contains("Module: broken") {
            Err(ProviderError::InvalidResponse("no candidates".into()))
        } else {
            Ok(format!("ok: {}", user.lines().next().unwrap_or_default()))
        }
    });
    let pool = ApiKeyPool::new(["gsk_a", "gsk_b"]).unwrap();
    let orchestrator = Orchestrator::new(pool, factory, fast_config());

    let summaries = orchestrator
        .run(&overview_input(), &tasks(&["api", "broken", "db"]))
        .await;

    let names: Vec<&str> = summaries.modules.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["api", "broken", "db"]);
    assert_eq!(summaries.modules[0].1.text, "ok: Logic Extracts for Module: api");
    assert!(summaries.modules[1].1.text.starts_with("Error generating module broken:"));
    assert_eq!(summaries.modules[2].1.text, "ok: Logic Extracts for Module: db");
    assert!(summaries.overview.succeeded());
}

#[tokio::test]
async fn keys_are_assigned_round_robin_with_overview_on_first() {
    let used = Arc::new(Mutex::new(Vec::<(String, String)>::new()));
    let used_in_factory = Arc::clone(&used);
    let factory = move |key: &ApiKey| {
        let secret = key.secret().to_string();
        let used = Arc::clone(&used_in_factory);
        let mut mock = MockCompletionProvider::new();
        mock.expect_complete().returning(move |_system: &str, user: &str| {
            let first = user.lines().next().unwrap_or_default().to_string();
            used.lock().unwrap().push((first, secret.clone()));
            Ok(secret.clone())
        });
        Box::new(mock) as Box<dyn CompletionProvider>
    };
    let pool = ApiKeyPool::new(["gsk_1", "gsk_2"]).unwrap();
    let orchestrator = Orchestrator::new(pool, factory, fast_config());

    let summaries = orchestrator
        .run(&overview_input(), &tasks(&["m0", "m1", "m2", "m3"]))
        .await;

    assert_eq!(summaries.overview.text, "gsk_1");
    let keys: Vec<&str> = summaries.modules.iter().map(|(_, o)| o.text.as_str()).collect();
    assert_eq!(keys, vec!["gsk_1", "gsk_2", "gsk_1", "gsk_2"]);
    assert_eq!(used.lock().unwrap().len(), 5);
}

/// Provider that sleeps and records the peak number of concurrent calls.
struct Gauge {
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

#[async_trait]
impl CompletionProvider for Gauge {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String, ProviderError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok("done".into())
    }
}

async fn peak_for(keys: &[&str], modules: usize) -> usize {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (f, p) = (Arc::clone(&in_flight), Arc::clone(&peak));
    let factory = move |_key: &ApiKey| {
        Box::new(Gauge {
            in_flight: Arc::clone(&f),
            peak: Arc::clone(&p),
        }) as Box<dyn CompletionProvider>
    };
    let pool = ApiKeyPool::new(keys.iter().copied()).unwrap();
    let orchestrator = Orchestrator::new(pool, factory, fast_config());
    assert_eq!(orchestrator.parallelism(), keys.len());

    let names: Vec<String> = (0..modules).map(|i| format!("m{i}")).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let summaries = orchestrator.run(&overview_input(), &tasks(&refs)).await;
    assert_eq!(summaries.modules.len(), modules);
    assert!(summaries.modules.iter().all(|(_, o)| o.succeeded()));
    peak.load(Ordering::SeqCst)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallelism_is_bounded_by_pool_size() {
    assert_eq!(peak_for(&["gsk_only"], 2).await, 1);
    let peak = peak_for(&["gsk_a", "gsk_b"], 6).await;
    assert!((1..=2).contains(&peak), "peak was {peak}");
}

#[tokio::test(start_paused = true)]
async fn default_backoff_waits_ninety_seconds_without_holding_the_key() {
    let start = tokio::time::Instant::now();
    let log: Arc<Mutex<Vec<(&'static str, tokio::time::Instant)>>> = Arc::default();
    let overview_calls = Arc::new(AtomicUsize::new(0));
    let factory = {
        let log = Arc::clone(&log);
        let overview_calls = Arc::clone(&overview_calls);
        scripted(Arc::new(AtomicUsize::new(0)), move |_, user| {
            let now = tokio::time::Instant::now();
            if user.starts_with("Repository Info:") {
                log.lock().unwrap().push(("overview", now));
                if overview_calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(ProviderError::RateLimited { retry_after_ms: None });
                }
                Ok("overview".into())
            } else {
                log.lock().unwrap().push(("module", now));
                Ok("module".into())
            }
        })
    };
    // one key, so a single worker slot
    let pool = ApiKeyPool::new(["gsk_only"]).unwrap();
    let orchestrator = Orchestrator::new(pool, factory, OrchestrateConfig::default());

    let summaries = orchestrator.run(&overview_input(), &tasks(&["api"])).await;

    assert_eq!(summaries.overview.state, TaskState::Succeeded);
    assert_eq!(summaries.overview.attempts, 2);
    assert_eq!(summaries.modules[0].1.state, TaskState::Succeeded);
    assert!(start.elapsed() >= Duration::from_secs(90));

    let log = log.lock().unwrap();
    let module_at = log
        .iter()
        .find(|(kind, _)| *kind == "module")
        .map(|(_, at)| *at)
        .expect("module was called");
    assert!(module_at.duration_since(start) < Duration::from_secs(90));

    let overview_at: Vec<_> = log
        .iter()
        .filter(|(kind, _)| *kind == "overview")
        .map(|(_, at)| *at)
        .collect();
    assert_eq!(overview_at.len(), 2);
    assert!(overview_at[1].duration_since(overview_at[0]) >= Duration::from_secs(90));
}
