/// Metrics and telemetry for the OCSP responder
///
/// Provides Prometheus-compatible metrics for monitoring:
/// - OCSP responses by response status and transport method
/// - Certificate statuses served
/// - Request and store lookup latencies

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter_vec, register_int_gauge, Encoder, Histogram,
    IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // ========== OCSP Metrics ==========

    /// OCSP responses by response status and HTTP method
    pub static ref OCSP_RESPONSES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "ocsp_responses_total",
        "Total number of OCSP responses sent",
        &["status", "method"]
    )
    .unwrap();

    /// Certificate statuses reported inside successful responses
    pub static ref OCSP_CERT_STATUSES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "ocsp_cert_statuses_total",
        "Total number of certificate statuses served",
        &["cert_status"]
    )
    .unwrap();

    /// Time from receiving request bytes to having response bytes
    pub static ref OCSP_REQUEST_DURATION_SECONDS: Histogram = register_histogram!(
        "ocsp_request_duration_seconds",
        "OCSP request latencies in seconds",
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .unwrap();

    /// OCSP requests currently being processed
    pub static ref OCSP_REQUESTS_ACTIVE: IntGauge = register_int_gauge!(
        "ocsp_requests_active",
        "Number of OCSP requests currently being processed"
    )
    .unwrap();

    // ========== Store Metrics ==========

    /// Revocation store lookup duration in seconds
    pub static ref STORE_LOOKUP_DURATION_SECONDS: Histogram = register_histogram!(
        "store_lookup_duration_seconds",
        "Revocation store lookup latencies in seconds",
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .unwrap();
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Keeps `ocsp_requests_active` raised while it is alive
#[must_use]
pub struct ActiveRequest {
    _private: (),
}

impl Drop for ActiveRequest {
    fn drop(&mut self) {
        OCSP_REQUESTS_ACTIVE.dec();
    }
}

/// Count a request as in flight until the returned guard is dropped,
/// including when the request future is dropped before it finishes
pub fn track_active_request() -> ActiveRequest {
    OCSP_REQUESTS_ACTIVE.inc();
    ActiveRequest { _private: () }
}

/// Record one OCSP response
pub fn record_ocsp_response(status: &str, method: &str, duration: f64) {
    OCSP_RESPONSES_TOTAL
        .with_label_values(&[status, method])
        .inc();
    OCSP_REQUEST_DURATION_SECONDS.observe(duration);
}

/// Record a certificate status served to a client
pub fn record_cert_status(cert_status: &str) {
    OCSP_CERT_STATUSES_TOTAL
        .with_label_values(&[cert_status])
        .inc();
}

/// Record a revocation store lookup
pub fn record_store_lookup(duration: f64) {
    STORE_LOOKUP_DURATION_SECONDS.observe(duration);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_ocsp_response() {
        record_ocsp_response("successful", "POST", 0.004);
        let metrics = render_metrics();
        assert!(metrics.contains("ocsp_responses_total"));
        assert!(metrics.contains("ocsp_request_duration_seconds"));
    }

    #[test]
    fn test_record_cert_status() {
        record_cert_status("revoked");
        let metrics = render_metrics();
        assert!(metrics.contains("ocsp_cert_statuses_total"));
        assert!(metrics.contains("cert_status=\"revoked\""));
    }

    #[test]
    fn test_record_store_lookup() {
        record_store_lookup(0.0002);
        let metrics = render_metrics();
        assert!(metrics.contains("store_lookup_duration_seconds"));
    }
}
