use std::env;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use pacedload::load_test::LoadTest;
use pacedload::metrics::{gather_metrics_string, register_metrics, start_metrics_server};
use pacedload::report::{format_failure_breakdown, format_results_table};
use pacedload::yaml_config::LoadTestPlan;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Prints helpful usage documentation.
fn print_usage() {
    eprintln!("Usage: pacedload <plan.yaml>");
    eprintln!();
    eprintln!("The plan path can also be given through the LOADTEST_CONFIG environment variable.");
    eprintln!();
    eprintln!("Optional environment variables:");
    eprintln!("  RUST_LOG                - Log filter (default: info)");
    eprintln!("  LOG_FORMAT              - Set to 'json' for JSON log lines");
    eprintln!("  METRIC_NAMESPACE        - Prometheus metric namespace (default: pacedload)");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing();

    let Some(plan_path) = env::args().nth(1).or_else(|| env::var("LOADTEST_CONFIG").ok()) else {
        print_usage();
        std::process::exit(2);
    };

    let plan = match LoadTestPlan::from_file(&plan_path) {
        Ok(plan) => plan,
        Err(e) => {
            error!(path = %plan_path, error = %e, "Failed to load plan");
            std::process::exit(1);
        }
    };
    info!(path = %plan_path, endpoints = plan.endpoints.len(), "Loaded plan");

    if let Some(schedule) = plan.load_model()?.step_schedule()? {
        for (minute, rpm) in schedule {
            debug!(minute = minute, rpm = rpm, "Step schedule");
        }
    }

    let config = plan.to_load_test_config()?;

    // Register Prometheus metrics
    register_metrics()?;
    let registry_arc = Arc::new(Mutex::new(prometheus::default_registry().clone()));

    if let Some(metrics_port) = plan.metrics_port {
        let registry = registry_arc.clone();
        tokio::spawn(async move {
            start_metrics_server(metrics_port, registry).await;
        });
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    warn!("Interrupt received, waiting for in-flight executions to finish");
                    cancel.cancel();
                }
                Err(e) => error!(error = %e, "Failed to listen for interrupt"),
            }
        });
    }

    let load_test = LoadTest::new(config)?;
    let results = load_test.run(cancel).await?;

    println!("{}", format_results_table(&results));

    let breakdown = format_failure_breakdown(&results);
    if !breakdown.is_empty() {
        println!("--- FAILURES BY CATEGORY ---\n{}", breakdown);
    }

    debug!(
        metrics = %gather_metrics_string(&registry_arc),
        "Final metrics"
    );

    Ok(())
}
