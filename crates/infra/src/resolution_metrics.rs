use idlink_domain::ports::metrics::{FailureReason, IdentityMetrics};
use metrics::counter;

pub const IDENTITY_RESOLUTION_TOTAL: &str = "idlink_identity_resolution_total";

/// Forwards resolution outcomes to the global `metrics` recorder.
#[derive(Clone, Copy, Debug, Default)]
pub struct MetricsIdentityRecorder;

impl IdentityMetrics for MetricsIdentityRecorder {
    fn record_lookup_hit(&self) {
        counter!(IDENTITY_RESOLUTION_TOTAL, "outcome" => "lookup_hit", "reason" => "none")
            .increment(1);
    }

    fn record_provision(&self) {
        counter!(IDENTITY_RESOLUTION_TOTAL, "outcome" => "provisioned", "reason" => "none")
            .increment(1);
    }

    fn record_failure(&self, reason: FailureReason) {
        counter!(IDENTITY_RESOLUTION_TOTAL, "outcome" => "failure", "reason" => reason.as_str())
            .increment(1);
    }
}
