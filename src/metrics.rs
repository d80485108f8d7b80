use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use prometheus::{
    Encoder, Gauge, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::env;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, info};

use crate::runner::ExecResult;

lazy_static::lazy_static! {
    pub static ref METRIC_NAMESPACE: String =
        env::var("METRIC_NAMESPACE").unwrap_or_else(|_| "pacedload".to_string());

    // === Dispatch Metrics ===

    pub static ref HITS_ISSUED_TOTAL: IntCounter =
        IntCounter::with_opts(
            Opts::new("hits_issued_total", "Total number of hits handed to workers")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref TARGET_RATE: Gauge =
        Gauge::with_opts(
            Opts::new("target_rate_per_second", "Instantaneous target hit rate (0 = unbounded)")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref ACTIVE_WORKERS: IntGauge =
        IntGauge::with_opts(
            Opts::new("active_workers", "Number of workers in the pool")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref IN_FLIGHT_EXECUTIONS: Gauge =
        Gauge::with_opts(
            Opts::new("in_flight_executions", "Number of executions currently running")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    // === Result Metrics ===

    pub static ref RESULTS_TOTAL: IntCounterVec =
        IntCounterVec::new(
            Opts::new("results_total", "Total number of execution results")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["executor", "status"]  // status: success, failed
        ).unwrap();

    pub static ref FAILURES_BY_CATEGORY: IntCounterVec =
        IntCounterVec::new(
            Opts::new("failures_by_category_total", "Failed executions by error category")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["category"]
        ).unwrap();

    pub static ref RESULT_DURATION_SECONDS: HistogramVec =
        HistogramVec::new(
            prometheus::HistogramOpts::new(
                "result_duration_seconds",
                "Execution latencies in seconds"
            ).namespace(METRIC_NAMESPACE.as_str()),
            &["executor"]
        ).unwrap();
}

/// Registers all metrics with the default Prometheus registry.
pub fn register_metrics() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Dispatch metrics
    prometheus::default_registry().register(Box::new(HITS_ISSUED_TOTAL.clone()))?;
    prometheus::default_registry().register(Box::new(TARGET_RATE.clone()))?;
    prometheus::default_registry().register(Box::new(ACTIVE_WORKERS.clone()))?;
    prometheus::default_registry().register(Box::new(IN_FLIGHT_EXECUTIONS.clone()))?;

    // Result metrics
    prometheus::default_registry().register(Box::new(RESULTS_TOTAL.clone()))?;
    prometheus::default_registry().register(Box::new(FAILURES_BY_CATEGORY.clone()))?;
    prometheus::default_registry().register(Box::new(RESULT_DURATION_SECONDS.clone()))?;

    Ok(())
}

/// Updates the result metrics for one completed execution.
pub fn observe_result(result: &ExecResult) {
    let status = if result.error.is_some() {
        "failed"
    } else {
        "success"
    };
    RESULTS_TOTAL
        .with_label_values(&[result.identifier.as_str(), status])
        .inc();
    RESULT_DURATION_SECONDS
        .with_label_values(&[result.identifier.as_str()])
        .observe(result.latency.as_secs_f64());

    if let Some(error) = &result.error {
        FAILURES_BY_CATEGORY
            .with_label_values(&[error.category.label()])
            .inc();
    }
}

fn encode(registry: &Mutex<Registry>) -> Result<(Vec<u8>, String), prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = registry
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok((buffer, encoder.format_type().to_string()))
}

/// HTTP handler for the Prometheus metrics endpoint.
pub async fn metrics_handler(
    _req: Request<Body>,
    registry: Arc<Mutex<Registry>>,
) -> Result<Response<Body>, hyper::Error> {
    let response = match encode(&registry) {
        Ok((buffer, content_type)) => Response::builder()
            .status(200)
            .header("Content-Type", content_type)
            .body(Body::from(buffer)),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            Response::builder()
                .status(500)
                .body(Body::from("failed to encode metrics"))
        }
    };

    Ok(response.unwrap_or_else(|_| Response::new(Body::empty())))
}

/// Starts the Prometheus metrics HTTP server.
pub async fn start_metrics_server(port: u16, registry: Arc<Mutex<Registry>>) {
    let addr = ([0, 0, 0, 0], port).into();

    let make_svc = make_service_fn(move |_conn| {
        let registry_clone = registry.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                let registry_clone_inner = registry_clone.clone();
                async move { metrics_handler(req, registry_clone_inner).await }
            }))
        }
    });

    let server = match Server::try_bind(&addr) {
        Ok(builder) => builder.serve(make_svc),
        Err(e) => {
            error!(port = port, error = %e, "Failed to bind metrics server");
            return;
        }
    };
    info!(
        port = port,
        addr = %addr,
        "Metrics server listening"
    );

    if let Err(e) = server.await {
        error!(error = %e, "Metrics server error");
    }
}

/// Gathers and encodes metrics as a string for final output.
pub fn gather_metrics_string(registry: &Arc<Mutex<Registry>>) -> String {
    match encode(registry) {
        Ok((buffer, _)) => String::from_utf8(buffer).unwrap_or_else(|e| {
            error!(error = %e, "Error encoding metrics to UTF-8");
            String::from("# ERROR ENCODING METRICS TO UTF-8")
        }),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            String::from("# ERROR ENCODING METRICS")
        }
    }
}
