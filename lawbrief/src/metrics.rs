//! Application metrics, recorded through the `metrics` facade.
//!
//! When `enable_metrics` is set the axum-prometheus recorder is installed and these series are
//! rendered at `/internal/metrics` next to the HTTP request metrics. Without a recorder the calls
//! are no-ops.

use std::time::Duration;

/// Record the outcome of one attachment upload: `stored`, `rejected`, `too_large` or `failed`.
pub fn record_upload(outcome: &'static str) {
    ::metrics::counter!("lawbrief_uploads_total", "outcome" => outcome).increment(1);
}

/// Record one completion call. `kind` is `generate` or `revise`.
pub fn record_completion(kind: &'static str, success: bool, elapsed: Duration) {
    let outcome = if success { "success" } else { "error" };
    ::metrics::counter!("lawbrief_completions_total", "kind" => kind, "outcome" => outcome).increment(1);
    ::metrics::histogram!("lawbrief_completion_duration_seconds", "kind" => kind).record(elapsed.as_secs_f64());
}
