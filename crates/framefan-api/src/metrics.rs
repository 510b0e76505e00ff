//! Prometheus metrics for the API server.

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

/// Initialize the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "framefan_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "framefan_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "framefan_http_requests_in_flight";

    // Render API metrics
    pub const RENDERS_REJECTED_TOTAL: &str = "framefan_renders_rejected_total";
    pub const CLEANUPS_TOTAL: &str = "framefan_cleanups_total";
    pub const OBJECTS_SWEPT_TOTAL: &str = "framefan_objects_swept_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record a launch rejected before dispatch.
pub fn record_render_rejected() {
    counter!(names::RENDERS_REJECTED_TOTAL).increment(1);
}

/// Record a cleanup sweep.
pub fn record_cleanup(deleted: u32) {
    counter!(names::CLEANUPS_TOTAL).increment(1);
    counter!(names::OBJECTS_SWEPT_TOTAL).increment(u64::from(deleted));
}

/// Sanitize path for metrics labels: render IDs become a placeholder.
fn sanitize_path(path: &str) -> String {
    let mut previous = "";
    path.split('/')
        .map(|segment| {
            let out = if previous == "renders" && !segment.is_empty() {
                ":render_id"
            } else {
                segment
            };
            previous = segment;
            out
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}
