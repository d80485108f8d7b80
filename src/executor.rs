//! Units of load-test work.
//!
//! An [`Executor`] is one kind of action the runner can issue: an HTTP call, a
//! gRPC call, a database query, or any async closure. The runner never looks
//! at concrete types. It only reads the name and options and awaits
//! [`Executor::execute`].
//!
//! Cancellation is by drop: when an executor's timeout expires, the runner
//! drops the in-flight future. Executors must not block the async runtime.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::chooser::{ChooserError, WeightedChooser};
use crate::errors::ExecutionError;

/// Per-executor tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorOptions {
    /// Relative selection weight. Must be greater than zero to be chosen.
    pub weight: u32,

    /// Upper bound for a single execution. `None` inherits the load test's
    /// default timeout, if any.
    pub timeout: Option<Duration>,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            weight: 1,
            timeout: None,
        }
    }
}

/// What an executor reports back for one execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionResponse {
    /// Aggregation key, normally the executor's name.
    pub identifier: String,
    pub error: Option<ExecutionError>,
    pub additional_data: Option<serde_json::Value>,
}

impl ExecutionResponse {
    pub fn success(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            error: None,
            additional_data: None,
        }
    }

    pub fn failure(identifier: impl Into<String>, error: ExecutionError) -> Self {
        Self {
            identifier: identifier.into(),
            error: Some(error),
            additional_data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.additional_data = Some(data);
        self
    }
}

/// One kind of load-test action.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Stable, unique, non-empty name. Used for weight overrides and as the
    /// default aggregation key.
    fn name(&self) -> &str;

    fn options(&self) -> ExecutorOptions;

    /// Performs one unit of work.
    async fn execute(&self) -> ExecutionResponse;

    /// Every identifier this executor may report results under.
    fn identifiers(&self) -> Vec<String> {
        vec![self.name().to_string()]
    }
}

/// Shared handle to an executor, as registered with a load test.
pub type ExecutorRef = Arc<dyn Executor>;

type Handler = Box<dyn Fn() -> BoxFuture<'static, Result<(), ExecutionError>> + Send + Sync>;

/// Executor backed by an async closure.
///
/// ```
/// use pacedload::executor::{Executor, GenericExecutor};
///
/// let executor = GenericExecutor::new("ping", || async { Ok(()) }).with_weight(3);
/// assert_eq!(executor.name(), "ping");
/// assert_eq!(executor.options().weight, 3);
/// ```
pub struct GenericExecutor {
    name: String,
    handler: Handler,
    options: ExecutorOptions,
}

impl GenericExecutor {
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ExecutionError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            handler: Box::new(move || handler().boxed()),
            options: ExecutorOptions::default(),
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.options.weight = weight;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    pub fn into_ref(self) -> ExecutorRef {
        Arc::new(self)
    }
}

#[async_trait]
impl Executor for GenericExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn options(&self) -> ExecutorOptions {
        self.options
    }

    async fn execute(&self) -> ExecutionResponse {
        match (self.handler)().await {
            Ok(()) => ExecutionResponse::success(&self.name),
            Err(e) => ExecutionResponse::failure(&self.name, e),
        }
    }
}

/// A weighted set of executors registered under one name.
///
/// The group is chosen by the runner like any other executor; each execution
/// then picks one member by weight and reports under the member's identifier.
/// A member's own timeout bounds its execution inside the group.
pub struct ExecutorGroup {
    name: String,
    chooser: WeightedChooser,
    options: ExecutorOptions,
}

impl ExecutorGroup {
    /// Builds a group. A `weight` of zero means "sum of the members' weights".
    pub fn new(
        name: impl Into<String>,
        weight: u32,
        executors: Vec<ExecutorRef>,
    ) -> Result<Self, ChooserError> {
        let chooser = WeightedChooser::new(&executors, &Default::default())?;
        let weight = if weight == 0 {
            u32::try_from(chooser.total_weight()).unwrap_or(u32::MAX)
        } else {
            weight
        };

        Ok(Self {
            name: name.into(),
            chooser,
            options: ExecutorOptions {
                weight,
                timeout: None,
            },
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Executor for ExecutorGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn options(&self) -> ExecutorOptions {
        self.options
    }

    async fn execute(&self) -> ExecutionResponse {
        let member = {
            let mut rng = rand::thread_rng();
            Arc::clone(self.chooser.pick(&mut rng))
        };

        // The group's own timeout is applied by the runner, a member's here.
        match member.options().timeout.filter(|t| !t.is_zero()) {
            Some(limit) => match tokio::time::timeout(limit, member.execute()).await {
                Ok(response) => response,
                Err(_) => ExecutionResponse::failure(member.name(), ExecutionError::timeout(limit)),
            },
            None => member.execute().await,
        }
    }

    fn identifiers(&self) -> Vec<String> {
        self.chooser
            .executors()
            .flat_map(|e| e.identifiers())
            .collect()
    }
}

/// Gives an executor without its own timeout the load test's default one.
struct DefaultTimeout {
    inner: ExecutorRef,
    timeout: Duration,
}

#[async_trait]
impl Executor for DefaultTimeout {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn options(&self) -> ExecutorOptions {
        let mut options = self.inner.options();
        options.timeout.get_or_insert(self.timeout);
        options
    }

    async fn execute(&self) -> ExecutionResponse {
        self.inner.execute().await
    }

    fn identifiers(&self) -> Vec<String> {
        self.inner.identifiers()
    }
}

/// Applies `default_timeout` to every executor that doesn't set its own.
pub fn with_default_timeout(
    executors: Vec<ExecutorRef>,
    default_timeout: Option<Duration>,
) -> Vec<ExecutorRef> {
    match default_timeout {
        Some(timeout) if !timeout.is_zero() => executors
            .into_iter()
            .map(|inner| {
                if inner.options().timeout.is_some() {
                    inner
                } else {
                    Arc::new(DefaultTimeout { inner, timeout }) as ExecutorRef
                }
            })
            .collect(),
        _ => executors,
    }
}
