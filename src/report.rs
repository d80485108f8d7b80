//! End-of-run summary rendering.

use crate::results::{EndpointResults, LoadTestResults};

/// Left-aligns every cell of a column to the column's widest cell.
fn pad_column(cells: Vec<String>) -> Vec<String> {
    let width = cells.iter().map(|c| c.len()).max().unwrap_or(0);
    cells
        .into_iter()
        .map(|cell| format!("{:<width$}", cell, width = width))
        .collect()
}

fn optional_ms(label: &str, value: Option<f64>) -> String {
    match value {
        Some(ms) => format!("{}={:.2}ms", label, ms),
        None => String::new(),
    }
}

fn average(entry: &EndpointResults) -> String {
    let avg = entry.average_duration_ms();
    if avg.is_nan() {
        String::new()
    } else {
        format!("avg={:.2}ms", avg)
    }
}

/// Renders one line per result identifier, sorted by name:
///
/// ```text
/// create...: total=12 failed=1 avg=20.50ms p50=19.00ms p99=41.00ms
/// users....: total=30 failed=0 avg=8.10ms  p50=7.00ms  p99=15.00ms
/// ```
///
/// Latency columns are left empty for identifiers without samples, and
/// dropped entirely when no identifier has any.
pub fn format_results_table(results: &LoadTestResults) -> String {
    let entries = results.iter();
    if entries.is_empty() {
        return "No results recorded.\n".to_string();
    }

    let name_width = entries.iter().map(|e| e.name().len()).max().unwrap_or(0);
    let mut rows: Vec<Vec<String>> = entries
        .iter()
        .map(|e| {
            vec![format!(
                "{}{}:",
                e.name(),
                ".".repeat(name_width - e.name().len() + 3)
            )]
        })
        .collect();

    let columns = [
        entries
            .iter()
            .map(|e| format!("total={}", e.total_requests()))
            .collect::<Vec<_>>(),
        entries
            .iter()
            .map(|e| format!("failed={}", e.failed_requests()))
            .collect(),
        entries.iter().map(|e| average(e)).collect(),
        entries
            .iter()
            .map(|e| optional_ms("p50", e.percentile_ms(0.50)))
            .collect(),
        entries
            .iter()
            .map(|e| optional_ms("p99", e.percentile_ms(0.99)))
            .collect(),
    ];

    for column in columns {
        if column.iter().all(|cell| cell.is_empty()) {
            continue;
        }
        for (row, cell) in rows.iter_mut().zip(pad_column(column)) {
            row.push(cell);
        }
    }

    let mut output = String::from("\n");
    for row in rows {
        output.push_str(row.join(" ").trim_end());
        output.push('\n');
    }
    output
}

/// Renders the failure breakdown by error category, or an empty string when
/// nothing failed.
pub fn format_failure_breakdown(results: &LoadTestResults) -> String {
    let mut output = String::new();

    for entry in results.iter() {
        let failures = entry.failures_by_category();
        if failures.is_empty() {
            continue;
        }

        output.push_str(&format!("{}:\n", entry.name()));
        for (category, count) in failures {
            output.push_str(&format!("  {:<30} {:>8}\n", category.description(), count));
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ExecutionError;
    use crate::runner::ExecResult;
    use std::time::Duration;
    use tokio::time::Instant;

    fn record(results: &LoadTestResults, name: &str, ms: u64, failed: bool) {
        results.record(&ExecResult {
            identifier: name.to_string(),
            timestamp: Instant::now(),
            latency: Duration::from_millis(ms),
            error: failed.then(|| ExecutionError::from_status(500, "boom").unwrap()),
            additional_data: None,
        });
    }

    #[test]
    fn test_table_alignment_and_order() {
        let results = LoadTestResults::new(["users", "create"]);
        record(&results, "users", 10, false);
        record(&results, "users", 20, false);
        record(&results, "create", 100, true);

        let table = format_results_table(&results);
        let lines: Vec<&str> = table.lines().filter(|l| !l.is_empty()).collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("create...: total=1 failed=1 avg=100.00ms"));
        assert!(lines[1].starts_with("users....: total=2 failed=0 avg=15.00ms "));
        assert!(lines[0].contains("p50="));
        assert!(lines[1].contains("p99="));
    }

    #[test]
    fn test_empty_entries_render_blank_latency() {
        let results = LoadTestResults::new(["idle", "busy"]);
        record(&results, "busy", 5, false);

        let table = format_results_table(&results);
        let idle = table.lines().find(|l| l.starts_with("idle")).unwrap();
        assert_eq!(idle, "idle...: total=0 failed=0");
    }

    #[test]
    fn test_no_samples_drops_latency_columns() {
        let results = LoadTestResults::new(["a"]);
        let table = format_results_table(&results);
        assert_eq!(table, "\na...: total=0 failed=0\n");
    }

    #[test]
    fn test_failure_breakdown() {
        let results = LoadTestResults::new(["a", "b"]);
        record(&results, "a", 1, true);
        record(&results, "b", 1, false);

        let breakdown = format_failure_breakdown(&results);
        assert!(breakdown.starts_with("a:\n"));
        assert!(breakdown.contains("HTTP 5xx Server Errors"));
        assert!(!breakdown.contains("b:"));
    }
}
