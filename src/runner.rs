//! Self-scaling worker pool driven by a [`Pacer`].
//!
//! One dispatch task asks the pacer how long to wait, then hands a tick to an
//! idle worker. Workers announce that they are idle by adding a permit to a
//! semaphore; the dispatch task consumes one permit per tick, so ticks are
//! only queued for workers that are actually waiting. When no worker is idle
//! and the pool is below its maximum, exactly one worker is added before the
//! dispatch task blocks on the handoff. Ticks are never dropped.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::FutureExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, Semaphore, TryAcquireError};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::chooser::{ChooserError, WeightedChooser};
use crate::errors::ExecutionError;
use crate::executor::{ExecutionResponse, ExecutorRef};
use crate::metrics::{
    observe_result, ACTIVE_WORKERS, HITS_ISSUED_TOTAL, IN_FLIGHT_EXECUTIONS, TARGET_RATE,
};
use crate::pacer::Pacer;

pub const DEFAULT_INITIAL_WORKERS: usize = 10;

/// The outcome of one execution, as emitted on the result stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecResult {
    pub identifier: String,

    /// When the worker started the execution.
    pub timestamp: Instant,

    pub latency: Duration,
    pub error: Option<ExecutionError>,
    pub additional_data: Option<serde_json::Value>,
}

impl ExecResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RunnerError {
    #[error("worker counts must be greater than zero (initial: {initial}, max: {max})")]
    InvalidWorkers { initial: usize, max: usize },

    #[error("runner has already been started")]
    AlreadyStarted,

    #[error(transparent)]
    Chooser(#[from] ChooserError),
}

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub initial_workers: usize,
    pub max_workers: usize,

    /// Replaces the weight of the executor with the same name.
    pub weight_overrides: HashMap<String, u32>,

    /// Makes executor selection reproducible. Worker `i` uses `seed + i`.
    pub seed: Option<u64>,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            initial_workers: DEFAULT_INITIAL_WORKERS,
            max_workers: usize::MAX,
            weight_overrides: HashMap::new(),
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

impl RunnerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RunnerState::Idle,
            1 => RunnerState::Running,
            2 => RunnerState::Stopping,
            _ => RunnerState::Stopped,
        }
    }
}

struct Shared {
    options: RunnerOptions,
    stop: CancellationToken,
    stopped: AtomicBool,
    state: AtomicU8,
    workers: AtomicUsize,
    issued: AtomicU64,
    started_at: OnceLock<Instant>,
}

impl Shared {
    fn transition(&self, from: RunnerState, to: RunnerState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Runs executors at the pace of a [`Pacer`] on a growing pool of workers.
///
/// A runner is single-use: [`Runner::run`] may be called once. Clones share
/// the same state, so any clone can stop the run.
#[derive(Clone)]
pub struct Runner {
    shared: Arc<Shared>,
}

impl Runner {
    pub fn new(options: RunnerOptions) -> Result<Self, RunnerError> {
        if options.initial_workers == 0 || options.max_workers == 0 {
            return Err(RunnerError::InvalidWorkers {
                initial: options.initial_workers,
                max: options.max_workers,
            });
        }

        Ok(Self {
            shared: Arc::new(Shared {
                options,
                stop: CancellationToken::new(),
                stopped: AtomicBool::new(false),
                state: AtomicU8::new(RunnerState::Idle as u8),
                workers: AtomicUsize::new(0),
                issued: AtomicU64::new(0),
                started_at: OnceLock::new(),
            }),
        })
    }

    /// Starts the run and returns the result stream.
    ///
    /// The run ends when `duration` elapses (`None` or zero runs until
    /// stopped), when `cancel` fires, or when [`Runner::stop`] is called. The
    /// stream closes once every worker has finished its in-flight execution.
    pub fn run(
        &self,
        cancel: CancellationToken,
        executors: Vec<ExecutorRef>,
        pacer: Arc<dyn Pacer>,
        duration: Option<Duration>,
    ) -> Result<mpsc::Receiver<ExecResult>, RunnerError> {
        let chooser = WeightedChooser::new(&executors, &self.shared.options.weight_overrides)?;

        if !self.shared.transition(RunnerState::Idle, RunnerState::Running) {
            return Err(RunnerError::AlreadyStarted);
        }
        // A stop that raced with start-up has to be visible as Stopping.
        if self.shared.stopped.load(Ordering::Acquire) {
            self.shared
                .transition(RunnerState::Running, RunnerState::Stopping);
        }

        let options = &self.shared.options;
        let initial = options.initial_workers.min(options.max_workers);
        let started_at = *self.shared.started_at.get_or_init(Instant::now);

        info!(
            executors = chooser.len(),
            initial_workers = initial,
            max_workers = options.max_workers,
            duration = ?duration,
            "Starting runner"
        );

        let (tick_tx, tick_rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = mpsc::channel(1);
        let pool = Arc::new(Pool {
            chooser,
            ticks: Mutex::new(tick_rx),
            idle: Semaphore::new(0),
            results: result_tx,
        });

        let mut workers = JoinSet::new();
        for _ in 0..initial {
            self.spawn_worker(&mut workers, &pool);
        }

        let runner = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if runner.stop() {
                        info!("Run cancelled");
                    }
                }
                _ = runner.shared.stop.cancelled() => {}
            }
        });

        let runner = self.clone();
        tokio::spawn(async move {
            runner
                .dispatch(pool, workers, tick_tx, pacer, duration, started_at)
                .await;
        });

        Ok(result_rx)
    }

    async fn dispatch(
        self,
        pool: Arc<Pool>,
        mut workers: JoinSet<()>,
        ticks: mpsc::UnboundedSender<()>,
        pacer: Arc<dyn Pacer>,
        duration: Option<Duration>,
        started_at: Instant,
    ) {
        let stop = self.shared.stop.clone();
        let duration = duration.filter(|d| !d.is_zero());
        let deadline = duration.and_then(|d| started_at.checked_add(d));
        let max_workers = self.shared.options.max_workers;
        let mut issued: u64 = 0;

        loop {
            if stop.is_cancelled() {
                break;
            }

            let elapsed = started_at.elapsed();
            if let Some(duration) = duration {
                if elapsed > duration {
                    info!(elapsed = ?elapsed, "Run duration reached");
                    break;
                }
            }

            TARGET_RATE.set(pacer.rate(elapsed));
            let wait = pacer.pace(elapsed, issued);
            if !wait.is_zero() {
                // `None` means too far out to represent, i.e. never.
                let wake = started_at.checked_add(elapsed + wait);
                match (wake, deadline) {
                    // The next hit falls after the end of the run.
                    (_, Some(deadline)) if wake.map_or(true, |wake| wake > deadline) => {
                        tokio::select! {
                            _ = tokio::time::sleep_until(deadline) => {
                                info!(elapsed = ?started_at.elapsed(), "Run duration reached");
                                break;
                            }
                            _ = stop.cancelled() => break,
                        }
                    }
                    (Some(wake), _) => {
                        tokio::select! {
                            _ = tokio::time::sleep_until(wake) => {}
                            _ = stop.cancelled() => break,
                        }
                    }
                    (None, _) => {
                        stop.cancelled().await;
                        break;
                    }
                }
            }

            let permit = match pool.idle.try_acquire() {
                Ok(permit) => permit,
                Err(TryAcquireError::NoPermits) => {
                    if self.worker_count() < max_workers {
                        // All workers are busy, add one and wait for the first
                        // worker to become idle.
                        self.spawn_worker(&mut workers, &pool);
                    }

                    tokio::select! {
                        permit = pool.idle.acquire() => match permit {
                            Ok(permit) => permit,
                            Err(_) => break,
                        },
                        _ = stop.cancelled() => break,
                        _ = pool.results.closed() => {
                            info!("Result stream dropped, stopping run");
                            break;
                        }
                    }
                }
                Err(TryAcquireError::Closed) => break,
            };

            permit.forget();
            if ticks.send(()).is_err() {
                break;
            }

            issued += 1;
            self.shared.issued.store(issued, Ordering::Relaxed);
            HITS_ISSUED_TOTAL.inc();
        }

        self.stop();
        drop(ticks);

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Worker task failed");
            }
        }

        ACTIVE_WORKERS.sub(self.worker_count() as i64);
        TARGET_RATE.set(0.0);
        self.shared
            .state
            .store(RunnerState::Stopped as u8, Ordering::Release);

        info!(
            hits_issued = issued,
            workers = self.worker_count(),
            elapsed = ?started_at.elapsed(),
            "Runner stopped"
        );
        // Dropping the last reference to the pool closes the result stream.
        drop(pool);
    }

    fn spawn_worker(&self, workers: &mut JoinSet<()>, pool: &Arc<Pool>) {
        let id = self.shared.workers.fetch_add(1, Ordering::AcqRel);
        ACTIVE_WORKERS.inc();

        let rng = match self.shared.options.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(id as u64)),
            None => StdRng::from_entropy(),
        };

        debug!(worker_id = id, workers = id + 1, "Spawning worker");
        workers.spawn(worker(id, Arc::clone(pool), rng));
    }

    /// Signals the run to stop. Returns true for the call that actually
    /// signalled, false for every later call.
    pub fn stop(&self) -> bool {
        if self.shared.stopped.swap(true, Ordering::AcqRel) {
            return false;
        }

        self.shared
            .transition(RunnerState::Running, RunnerState::Stopping);
        self.shared.stop.cancel();
        true
    }

    pub fn state(&self) -> RunnerState {
        RunnerState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Number of workers spawned so far. Never decreases.
    pub fn worker_count(&self) -> usize {
        self.shared.workers.load(Ordering::Acquire)
    }

    /// Number of ticks handed to workers so far.
    pub fn hits_issued(&self) -> u64 {
        self.shared.issued.load(Ordering::Relaxed)
    }

    /// When the run started, if it has.
    pub fn started_at(&self) -> Option<Instant> {
        self.shared.started_at.get().copied()
    }
}

/// State shared by the dispatch task and every worker.
struct Pool {
    chooser: WeightedChooser,
    ticks: Mutex<mpsc::UnboundedReceiver<()>>,
    idle: Semaphore,
    results: mpsc::Sender<ExecResult>,
}

async fn worker(id: usize, pool: Arc<Pool>, mut rng: StdRng) {
    loop {
        pool.idle.add_permits(1);

        let tick = pool.ticks.lock().await.recv().await;
        if tick.is_none() {
            break;
        }

        let executor = Arc::clone(pool.chooser.pick(&mut rng));
        let result = execute(&executor).await;
        observe_result(&result);

        if pool.results.send(result).await.is_err() {
            debug!(worker_id = id, "Result stream closed, worker exiting");
            break;
        }
    }
}

/// Runs one execution under the executor's timeout, turning timeouts and
/// panics into failed results.
async fn execute(executor: &ExecutorRef) -> ExecResult {
    let timeout = executor.options().timeout.filter(|t| !t.is_zero());
    let timestamp = Instant::now();

    IN_FLIGHT_EXECUTIONS.inc();
    let call = AssertUnwindSafe(executor.execute()).catch_unwind();
    let outcome = match timeout {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| ExecutionError::timeout(limit)),
        None => Ok(call.await),
    };
    IN_FLIGHT_EXECUTIONS.dec();
    let latency = timestamp.elapsed();

    let response = match outcome {
        Ok(Ok(response)) => response,
        Ok(Err(panic)) => {
            let message = panic_message(panic.as_ref());
            error!(executor = executor.name(), panic = %message, "Executor panicked");
            ExecutionResponse::failure(executor.name(), ExecutionError::panic(message))
        }
        Err(timed_out) => {
            debug!(executor = executor.name(), timeout = ?timeout, "Execution timed out");
            ExecutionResponse::failure(executor.name(), timed_out)
        }
    };

    let identifier = if response.identifier.is_empty() {
        executor.name().to_string()
    } else {
        response.identifier
    };

    ExecResult {
        identifier,
        timestamp,
        latency,
        error: response.error,
        additional_data: response.additional_data,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "executor panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCategory;
    use crate::executor::GenericExecutor;

    #[test]
    fn test_zero_workers_rejected() {
        let options = RunnerOptions {
            initial_workers: 0,
            ..Default::default()
        };
        assert_eq!(
            Runner::new(options).err(),
            Some(RunnerError::InvalidWorkers {
                initial: 0,
                max: usize::MAX
            })
        );
    }

    #[test]
    fn test_stop_before_run_is_idempotent() {
        let runner = Runner::new(RunnerOptions::default()).unwrap();
        assert_eq!(runner.state(), RunnerState::Idle);
        assert!(runner.stop());
        assert!(!runner.stop());
        assert!(runner.started_at().is_none());
    }

    #[tokio::test]
    async fn test_execute_captures_timeout() {
        let executor = GenericExecutor::new("slow", || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .with_timeout(Duration::from_millis(20))
        .into_ref();

        let result = execute(&executor).await;
        assert_eq!(result.identifier, "slow");
        let error = result.error.expect("should time out");
        assert_eq!(error.category, ErrorCategory::TimeoutError);
        assert!(result.latency < Duration::from_secs(1));
    }

    fn explode() -> Result<(), ExecutionError> {
        panic!("exploded")
    }

    #[tokio::test]
    async fn test_execute_captures_panic() {
        let executor = GenericExecutor::new("boom", || async { explode() }).into_ref();

        let result = execute(&executor).await;
        assert_eq!(result.identifier, "boom");
        let error = result.error.expect("should report the panic");
        assert_eq!(error.category, ErrorCategory::Panic);
        assert_eq!(error.message, "exploded");
    }

    #[test]
    fn test_panic_message_fallback() {
        let payload: Box<dyn Any + Send> = Box::new(42u32);
        assert_eq!(panic_message(payload.as_ref()), "executor panicked");
    }
}
