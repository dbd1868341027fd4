// TestDependencies - mock implementations for testing
//
// Provides mock services and a builder that wires them into ServerDeps
// over the in-memory stores.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use super::jobs::{
    AutomationJob, ClaimedJob, EnqueueError, EnqueueOptions, EnqueueResult, ErrorKind,
    FailOutcome, InMemoryJobQueue, JobCounts, JobQueue, JobRecord,
};
use super::stores::{
    MemoryAutomationRunStore, MemoryAutomationSettingsStore, MemoryFollowupStore,
    MemorySeedStore, MemoryTransactionStore,
};
use super::{BaseAI, BaseAutomationRunStore, BaseAutomationSettingsStore, ServerDeps};
use crate::common::{AutomationId, JobId, SeedId};
use crate::config::{QueueConfig, RegistryLoadConfig};
use crate::domains::automations::{
    builtin_automations, Automation, AutomationRegistry, AutomationSettings, RegistryError,
    RunCommit,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Mock AI
// =============================================================================

/// Scripted generation service. Clones share the same script and call log.
#[derive(Clone, Default)]
pub struct MockAI {
    responses: Arc<Mutex<VecDeque<Result<String, String>>>>,
    calls: Arc<Mutex<Vec<String>>>,
    delay: Option<Duration>,
}

impl MockAI {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a response to the queue
    pub fn with_response(self, response: impl Into<String>) -> Self {
        lock(&self.responses).push_back(Ok(response.into()));
        self
    }

    /// Add a JSON response to the queue (will be serialized)
    pub fn with_json_response<T: serde::Serialize>(self, data: &T) -> Self {
        let json = serde_json::to_string(data).unwrap_or_else(|_| "{}".to_string());
        self.with_response(json)
    }

    /// Make the next call fail with `message`
    pub fn with_error(self, message: impl Into<String>) -> Self {
        lock(&self.responses).push_back(Err(message.into()));
        self
    }

    /// Sleep before answering every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Get all prompts that were sent to the AI
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }
}

#[async_trait]
impl BaseAI for MockAI {
    async fn complete(&self, prompt: &str) -> Result<String> {
        lock(&self.calls).push(prompt.to_string());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        // An empty script answers with an empty JSON object
        match lock(&self.responses).pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok("{}".to_string()),
        }
    }
}

// =============================================================================
// Failing collaborators
// =============================================================================

/// Job queue whose backend is down: every call fails.
#[derive(Default)]
pub struct UnavailableJobQueue;

#[async_trait]
impl JobQueue for UnavailableJobQueue {
    async fn enqueue(
        &self,
        _job: AutomationJob,
        _opts: EnqueueOptions,
    ) -> Result<EnqueueResult, EnqueueError> {
        Err(EnqueueError::Unavailable(anyhow!("connection refused")))
    }

    async fn get_job(&self, _id: JobId) -> Result<Option<JobRecord>> {
        Err(anyhow!("connection refused"))
    }

    async fn counts(&self) -> Result<JobCounts> {
        Err(anyhow!("connection refused"))
    }

    async fn next(&self, cancel: &CancellationToken) -> Result<Option<ClaimedJob>> {
        cancel.cancelled().await;
        Ok(None)
    }

    async fn complete(&self, _id: JobId) -> Result<()> {
        Err(anyhow!("connection refused"))
    }

    async fn fail(&self, _id: JobId, _error: &str, _kind: ErrorKind) -> Result<FailOutcome> {
        Err(anyhow!("connection refused"))
    }

    async fn close(&self) {}
}

/// Settings store that is unreachable for its first `failures` loads.
pub struct FlakySettingsStore {
    inner: MemoryAutomationSettingsStore,
    remaining_failures: Mutex<u32>,
    load_calls: Mutex<u32>,
}

impl FlakySettingsStore {
    pub fn new(failures: u32) -> Self {
        Self {
            inner: MemoryAutomationSettingsStore::new(),
            remaining_failures: Mutex::new(failures),
            load_calls: Mutex::new(0),
        }
    }

    pub fn load_calls(&self) -> u32 {
        *lock(&self.load_calls)
    }
}

#[async_trait]
impl BaseAutomationSettingsStore for FlakySettingsStore {
    async fn load(&self) -> Result<Vec<AutomationSettings>> {
        *lock(&self.load_calls) += 1;
        {
            let mut remaining = lock(&self.remaining_failures);
            if *remaining > 0 {
                *remaining -= 1;
                return Err(anyhow!("relation \"automation_settings\" does not exist"));
            }
        }
        self.inner.load().await
    }

    async fn insert(&self, settings: &AutomationSettings) -> Result<()> {
        self.inner.insert(settings).await
    }

    async fn set_enabled(&self, id: AutomationId, enabled: bool) -> Result<()> {
        self.inner.set_enabled(id, enabled).await
    }
}

/// Run store that can be slowed down or made to reject commits.
pub struct FaultyRunStore {
    inner: Arc<dyn BaseAutomationRunStore>,
    delay: Option<Duration>,
    remaining_failures: Mutex<u32>,
    commit_calls: Mutex<u32>,
}

impl FaultyRunStore {
    pub fn wrap(inner: Arc<dyn BaseAutomationRunStore>) -> Self {
        Self {
            inner,
            delay: None,
            remaining_failures: Mutex::new(0),
            commit_calls: Mutex::new(0),
        }
    }

    /// Sleep before every commit
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Reject the next `failures` commits without writing anything
    pub fn failing(self, failures: u32) -> Self {
        *lock(&self.remaining_failures) = failures;
        self
    }

    pub fn commit_calls(&self) -> u32 {
        *lock(&self.commit_calls)
    }
}

#[async_trait]
impl BaseAutomationRunStore for FaultyRunStore {
    async fn commit_run(&self, run: &RunCommit) -> Result<()> {
        *lock(&self.commit_calls) += 1;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        {
            let mut remaining = lock(&self.remaining_failures);
            if *remaining > 0 {
                *remaining -= 1;
                return Err(anyhow!("could not serialize access due to concurrent update"));
            }
        }
        self.inner.commit_run(run).await
    }

    async fn last_runs(&self, seed_id: SeedId) -> Result<HashMap<AutomationId, DateTime<Utc>>> {
        self.inner.last_runs(seed_id).await
    }
}

// =============================================================================
// TestDependencies - Builder for test dependencies
// =============================================================================

pub struct TestDependencies {
    pub ai: MockAI,
    pub automations: Vec<Arc<dyn Automation>>,
    pub settings_store: Arc<dyn BaseAutomationSettingsStore>,
    pub queue_config: QueueConfig,
    pub job_queue: Option<Arc<dyn JobQueue>>,
    pub registry_load: RegistryLoadConfig,
}

impl TestDependencies {
    pub fn new() -> Self {
        Self {
            ai: MockAI::new(),
            automations: builtin_automations(),
            settings_store: Arc::new(MemoryAutomationSettingsStore::new()),
            queue_config: QueueConfig::default(),
            job_queue: None,
            registry_load: RegistryLoadConfig {
                attempts: 3,
                delay: Duration::from_millis(1),
            },
        }
    }

    /// Set a mock AI
    pub fn mock_ai(mut self, ai: MockAI) -> Self {
        self.ai = ai;
        self
    }

    /// Replace the built-in automation kinds
    pub fn with_automations(mut self, automations: Vec<Arc<dyn Automation>>) -> Self {
        self.automations = automations;
        self
    }

    pub fn with_settings_store(mut self, store: Arc<dyn BaseAutomationSettingsStore>) -> Self {
        self.settings_store = store;
        self
    }

    pub fn with_queue_config(mut self, config: QueueConfig) -> Self {
        self.queue_config = config;
        self
    }

    /// Use `queue` instead of a fresh in-memory queue
    pub fn with_job_queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.job_queue = Some(queue);
        self
    }

    pub fn with_registry_load(mut self, config: RegistryLoadConfig) -> Self {
        self.registry_load = config;
        self
    }

    /// Load the registry and wire everything over in-memory stores
    pub async fn build(self) -> Result<Arc<ServerDeps>, RegistryError> {
        let registry = AutomationRegistry::load(
            self.settings_store,
            self.automations,
            self.registry_load,
        )
        .await?;

        let job_queue = self
            .job_queue
            .unwrap_or_else(|| Arc::new(InMemoryJobQueue::new(self.queue_config)) as Arc<dyn JobQueue>);

        // Seeds and runs write across tables, so they share the underlying stores
        let transactions = Arc::new(MemoryTransactionStore::new());
        let followups = Arc::new(MemoryFollowupStore::new());

        Ok(Arc::new(
            ServerDeps::builder()
                .seeds(Arc::new(MemorySeedStore::new(transactions.clone())))
                .transactions(transactions.clone())
                .followups(followups.clone())
                .automation_runs(Arc::new(MemoryAutomationRunStore::new(transactions, followups)))
                .ai(Arc::new(self.ai))
                .registry(Arc::new(registry))
                .job_queue(job_queue)
                .build(),
        ))
    }
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}
