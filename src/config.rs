use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::time::Duration;
use tracing::info;

use crate::executor::ExecutorRef;
use crate::pacer::Pacer;
use crate::runner::{ExecResult, RunnerOptions, DEFAULT_INITIAL_WORKERS};

pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Callback invoked once for every result of a run.
pub type ResultHandler = Arc<dyn Fn(&ExecResult) + Send + Sync>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("a pacer is required")]
    MissingPacer,

    #[error("at least one executor is required")]
    NoExecutors,

    #[error("{field} must be greater than zero")]
    ZeroWorkers { field: &'static str },

    #[error("executor names can't be empty")]
    EmptyExecutorName,

    #[error("executor '{0}' is registered more than once")]
    DuplicateExecutor(String),

    #[error("report interval must be greater than zero")]
    ZeroReportInterval,
}

/// Everything a load test run needs. Built with [`LoadTestConfig::builder`].
#[derive(Clone)]
pub struct LoadTestConfig {
    pub pacer: Arc<dyn Pacer>,
    pub executors: Vec<ExecutorRef>,

    /// `None` runs until cancelled.
    pub duration: Option<Duration>,

    pub initial_workers: usize,
    pub max_workers: usize,
    pub weight_overrides: HashMap<String, u32>,

    /// Timeout for executors that don't set their own.
    pub default_timeout: Option<Duration>,

    pub report_interval: Duration,
    pub result_handlers: Vec<ResultHandler>,
    pub seed: Option<u64>,
}

impl LoadTestConfig {
    pub fn builder() -> LoadTestConfigBuilder {
        LoadTestConfigBuilder::default()
    }

    pub fn runner_options(&self) -> RunnerOptions {
        RunnerOptions {
            initial_workers: self.initial_workers,
            max_workers: self.max_workers,
            weight_overrides: self.weight_overrides.clone(),
            seed: self.seed,
        }
    }

    /// Logs a summary of the configuration.
    pub fn print_summary(&self) {
        let executors: Vec<&str> = self.executors.iter().map(|e| e.name()).collect();

        info!(
            executors = ?executors,
            duration = ?self.duration,
            initial_workers = self.initial_workers,
            max_workers = self.max_workers,
            default_timeout = ?self.default_timeout,
            report_interval = ?self.report_interval,
            weight_overrides = ?self.weight_overrides,
            initial_rate = self.pacer.rate(Duration::ZERO),
            "Load test configuration"
        );
    }
}

impl fmt::Debug for LoadTestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadTestConfig")
            .field(
                "executors",
                &self.executors.iter().map(|e| e.name()).collect::<Vec<_>>(),
            )
            .field("duration", &self.duration)
            .field("initial_workers", &self.initial_workers)
            .field("max_workers", &self.max_workers)
            .field("weight_overrides", &self.weight_overrides)
            .field("default_timeout", &self.default_timeout)
            .field("report_interval", &self.report_interval)
            .field("result_handlers", &self.result_handlers.len())
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}

pub struct LoadTestConfigBuilder {
    pacer: Option<Arc<dyn Pacer>>,
    executors: Vec<ExecutorRef>,
    duration: Option<Duration>,
    initial_workers: usize,
    max_workers: usize,
    weight_overrides: HashMap<String, u32>,
    default_timeout: Option<Duration>,
    report_interval: Duration,
    result_handlers: Vec<ResultHandler>,
    seed: Option<u64>,
}

impl Default for LoadTestConfigBuilder {
    fn default() -> Self {
        Self {
            pacer: None,
            executors: Vec::new(),
            duration: None,
            initial_workers: DEFAULT_INITIAL_WORKERS,
            max_workers: usize::MAX,
            weight_overrides: HashMap::new(),
            default_timeout: None,
            report_interval: DEFAULT_REPORT_INTERVAL,
            result_handlers: Vec::new(),
            seed: None,
        }
    }
}

impl LoadTestConfigBuilder {
    pub fn pacer(mut self, pacer: impl Pacer + 'static) -> Self {
        self.pacer = Some(Arc::new(pacer));
        self
    }

    pub fn shared_pacer(mut self, pacer: Arc<dyn Pacer>) -> Self {
        self.pacer = Some(pacer);
        self
    }

    pub fn executor(mut self, executor: ExecutorRef) -> Self {
        self.executors.push(executor);
        self
    }

    pub fn executors(mut self, executors: impl IntoIterator<Item = ExecutorRef>) -> Self {
        self.executors.extend(executors);
        self
    }

    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn initial_workers(mut self, workers: usize) -> Self {
        self.initial_workers = workers;
        self
    }

    pub fn max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    pub fn weight_override(mut self, name: impl Into<String>, weight: u32) -> Self {
        self.weight_overrides.insert(name.into(), weight);
        self
    }

    pub fn weight_overrides(mut self, overrides: HashMap<String, u32>) -> Self {
        self.weight_overrides.extend(overrides);
        self
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    pub fn result_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ExecResult) + Send + Sync + 'static,
    {
        self.result_handlers.push(Arc::new(handler));
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Validates and builds the configuration.
    pub fn build(self) -> Result<LoadTestConfig, ConfigError> {
        let pacer = self.pacer.ok_or(ConfigError::MissingPacer)?;

        if self.executors.is_empty() {
            return Err(ConfigError::NoExecutors);
        }
        if self.initial_workers == 0 {
            return Err(ConfigError::ZeroWorkers {
                field: "initial_workers",
            });
        }
        if self.max_workers == 0 {
            return Err(ConfigError::ZeroWorkers {
                field: "max_workers",
            });
        }
        if self.report_interval.is_zero() {
            return Err(ConfigError::ZeroReportInterval);
        }

        let mut names = HashSet::with_capacity(self.executors.len());
        for executor in &self.executors {
            let name = executor.name();
            if name.is_empty() {
                return Err(ConfigError::EmptyExecutorName);
            }
            if !names.insert(name) {
                return Err(ConfigError::DuplicateExecutor(name.to_string()));
            }
        }

        Ok(LoadTestConfig {
            pacer,
            executors: self.executors,
            duration: self.duration,
            initial_workers: self.initial_workers,
            max_workers: self.max_workers,
            weight_overrides: self.weight_overrides,
            default_timeout: self.default_timeout,
            report_interval: self.report_interval,
            result_handlers: self.result_handlers,
            seed: self.seed,
        })
    }
}
