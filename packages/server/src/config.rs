use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub scheduler_interval_secs: u64,
    pub scheduler_concurrency: usize,
    pub worker_concurrency: usize,
    pub job_timeout_secs: u64,
    pub job_max_attempts: u32,
    pub job_backoff_ms: u64,
    pub queue_retention: usize,
    pub registry_load_attempts: u32,
    pub registry_load_delay_ms: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            openai_api_key: env::var("OPENAI_API_KEY").ok().filter(|key| !key.is_empty()),
            openai_model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            scheduler_interval_secs: parse_var("SCHEDULER_INTERVAL_SECS", 30)?,
            scheduler_concurrency: parse_var("SCHEDULER_CONCURRENCY", 8)?,
            worker_concurrency: parse_var("WORKER_CONCURRENCY", 4)?,
            job_timeout_secs: parse_var("JOB_TIMEOUT_SECS", 120)?,
            job_max_attempts: parse_var("JOB_MAX_ATTEMPTS", 3)?,
            job_backoff_ms: parse_var("JOB_BACKOFF_MS", 1000)?,
            queue_retention: parse_var("QUEUE_RETENTION", 1000)?,
            registry_load_attempts: parse_var("REGISTRY_LOAD_ATTEMPTS", 10)?,
            registry_load_delay_ms: parse_var("REGISTRY_LOAD_DELAY_MS", 500)?,
        })
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_secs(self.scheduler_interval_secs.max(1)),
            concurrency: self.scheduler_concurrency.max(1),
        }
    }

    pub fn worker_pool(&self) -> WorkerPoolConfig {
        WorkerPoolConfig {
            concurrency: self.worker_concurrency.max(1),
            job_timeout: Duration::from_secs(self.job_timeout_secs.max(1)),
            ..WorkerPoolConfig::default()
        }
    }

    pub fn queue(&self) -> QueueConfig {
        QueueConfig {
            max_attempts: self.job_max_attempts.max(1),
            backoff_base: Duration::from_millis(self.job_backoff_ms),
            retention: self.queue_retention,
        }
    }

    pub fn registry_load(&self) -> RegistryLoadConfig {
        RegistryLoadConfig {
            attempts: self.registry_load_attempts.max(1),
            delay: Duration::from_millis(self.registry_load_delay_ms),
        }
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid number", name)),
        Err(_) => Ok(default),
    }
}

/// Pressure scheduler loop settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    /// Maximum seeds evaluated concurrently within one tick.
    pub concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            concurrency: 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub concurrency: usize,
    /// Upper bound for a single job attempt.
    pub job_timeout: Duration,
    /// How long `close()` waits for in-flight jobs before abandoning them.
    pub shutdown_grace: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            job_timeout: Duration::from_secs(120),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Attempts per job, including the first.
    pub max_attempts: u32,
    pub backoff_base: Duration,
    /// Finished jobs kept for inspection.
    pub retention: usize,
}

impl QueueConfig {
    /// Delay before retrying after the given (1-based) failed attempt:
    /// `backoff_base * 2^(attempt - 1)`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(1u32 << exponent)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(1000),
            retention: 1000,
        }
    }
}

/// Retry policy for loading automation settings at startup.
#[derive(Debug, Clone)]
pub struct RegistryLoadConfig {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RegistryLoadConfig {
    fn default() -> Self {
        Self {
            attempts: 10,
            delay: Duration::from_millis(500),
        }
    }
}
