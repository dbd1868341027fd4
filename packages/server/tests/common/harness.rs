//! Test harness over in-memory stores and a scripted AI.
//!
//! Every test gets its own dependency graph; nothing is shared between
//! tests, so they can run in parallel.

use std::sync::{Arc, Once};

use anyhow::{Context, Result};
use seeds_core::common::AutomationId;
use seeds_core::kernel::test_dependencies::{MockAI, TestDependencies};
use seeds_core::kernel::ServerDeps;

static TRACING: Once = Once::new();

/// Respect RUST_LOG when debugging a test:
/// RUST_LOG=seeds_core=debug cargo test -- --nocapture
fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub struct TestHarness {
    pub deps: Arc<ServerDeps>,
    /// Shares its script and call log with the AI inside `deps`.
    pub ai: MockAI,
}

impl TestHarness {
    /// Built-in automations, default queue settings, empty AI script.
    pub async fn new() -> Result<Self> {
        Self::with(TestDependencies::new()).await
    }

    pub async fn with(dependencies: TestDependencies) -> Result<Self> {
        init_tracing();

        let ai = dependencies.ai.clone();
        let deps = dependencies
            .build()
            .await
            .context("Failed to build test dependencies")?;
        Ok(Self { deps, ai })
    }

    pub fn automation_id(&self, name: &str) -> AutomationId {
        self.deps
            .registry
            .get_by_name(name)
            .map(|entry| entry.id())
            .unwrap_or_else(|| panic!("automation {name} is not registered"))
    }
}

/// Polls the queue until job `id` satisfies `done`, failing after `within`.
pub async fn wait_for_job(
    deps: &ServerDeps,
    id: seeds_core::common::JobId,
    within: std::time::Duration,
    done: impl Fn(&seeds_core::kernel::jobs::JobRecord) -> bool,
) -> seeds_core::kernel::jobs::JobRecord {
    tokio::time::timeout(within, async {
        loop {
            if let Some(record) = deps.job_queue.get_job(id).await.expect("get job") {
                if done(&record) {
                    return record;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("job {id} did not reach the expected state in {within:?}"))
}
