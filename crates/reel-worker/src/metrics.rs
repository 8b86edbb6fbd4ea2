//! Pipeline metrics.
//!
//! The binary installs a Prometheus recorder and dumps the rendered text next
//! to the finished videos; without a recorder these calls are no-ops.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Metric name constants for consistency.
pub mod names {
    /// Generated items by stage and outcome (generated, placeholder).
    pub const STAGE_ITEMS_TOTAL: &str = "reel_stage_items_total";

    /// Failed generation attempts by stage.
    pub const STAGE_RETRIES_TOTAL: &str = "reel_stage_retries_total";

    /// Wall time of a generation stage in seconds.
    pub const STAGE_DURATION_SECONDS: &str = "reel_stage_duration_seconds";

    /// Finished jobs by terminal status.
    pub const JOBS_TOTAL: &str = "reel_jobs_total";

    /// Wall time of a whole job in seconds.
    pub const JOB_DURATION_SECONDS: &str = "reel_job_duration_seconds";

    /// Batch items by final item status.
    pub const BATCH_ITEMS_TOTAL: &str = "reel_batch_items_total";
}

/// Install the global Prometheus recorder.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

pub fn record_stage_item(stage: &str, placeholder: bool) {
    let outcome = if placeholder { "placeholder" } else { "generated" };
    counter!(
        names::STAGE_ITEMS_TOTAL,
        "stage" => stage.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_stage_retry(stage: &str) {
    counter!(names::STAGE_RETRIES_TOTAL, "stage" => stage.to_string()).increment(1);
}

pub fn record_stage_duration(stage: &str, seconds: f64) {
    histogram!(names::STAGE_DURATION_SECONDS, "stage" => stage.to_string()).record(seconds);
}

pub fn record_job(status: &str, seconds: f64) {
    counter!(names::JOBS_TOTAL, "status" => status.to_string()).increment(1);
    histogram!(names::JOB_DURATION_SECONDS).record(seconds);
}

pub fn record_batch_item(status: &str) {
    counter!(names::BATCH_ITEMS_TOTAL, "status" => status.to_string()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert!(names::STAGE_ITEMS_TOTAL.starts_with("reel_"));
        assert!(names::JOB_DURATION_SECONDS.ends_with("_seconds"));
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_stage_item("audio", true);
        record_stage_retry("images");
        record_job("completed", 12.5);
    }
}
