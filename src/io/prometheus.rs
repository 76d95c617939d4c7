//! Prometheus text exposition for the `/metrics` endpoint

use crate::domain::types::CrowdLabel;
use crate::infra::metrics::{MetricsSnapshot, BUCKET_BOUNDS, NUM_BUCKETS};
use crate::services::predictor::ModelSource;
use std::fmt::Write;

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple unlabeled metric (counter or gauge)
fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    buckets: &[u64; NUM_BUCKETS],
    bounds: &[u64; NUM_BUCKETS - 1],
    sum: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{le=\"+Inf\"}} {cumulative}");
    let _ = writeln!(output, "{name}_sum {sum}");
    let _ = writeln!(output, "{name}_count {cumulative}");
}

/// Format metrics in Prometheus text exposition format
pub fn format_prometheus_metrics(snapshot: &MetricsSnapshot, source: &ModelSource) -> String {
    let mut output = String::with_capacity(2048);

    write_metric(
        &mut output,
        "crowd_http_requests_total",
        "HTTP requests received on any route",
        MetricType::Counter,
        snapshot.requests_total,
    );
    write_metric(
        &mut output,
        "crowd_health_checks_total",
        "Health check requests",
        MetricType::Counter,
        snapshot.health_checks_total,
    );
    write_metric(
        &mut output,
        "crowd_http_not_found_total",
        "Requests for unknown routes",
        MetricType::Counter,
        snapshot.not_found_total,
    );

    let _ = writeln!(output, "# HELP crowd_predictions_total Successful predictions by crowd level");
    let _ = writeln!(output, "# TYPE crowd_predictions_total counter");
    for label in CrowdLabel::ALL {
        let _ = writeln!(
            output,
            "crowd_predictions_total{{label=\"{label}\"}} {}",
            snapshot.predictions_by_class[label.index()]
        );
    }

    write_metric(
        &mut output,
        "crowd_prediction_errors_total",
        "Rejected prediction requests",
        MetricType::Counter,
        snapshot.prediction_errors_total,
    );
    write_histogram(
        &mut output,
        "crowd_predict_latency_us",
        "Prediction request handling latency in microseconds",
        &snapshot.latency_buckets,
        &BUCKET_BOUNDS,
        snapshot.latency_sum_us,
    );
    write_metric(
        &mut output,
        "crowd_model_trained",
        "1 if serving weights came from a checkpoint, 0 if randomly initialized",
        MetricType::Gauge,
        u64::from(source.is_trained()),
    );

    output
}
