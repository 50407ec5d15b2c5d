//! Prometheus metrics exposition
//!
//! The flow counters live in the `session` crate; this module installs the
//! recorder that renders them and adds the agent's own request timing:
//!
//! - `auth_flows_total` (counter): labels `flow`, `outcome`
//! - `auth_sign_outs_total` (counter): label `remote`
//! - `auth_storage_degraded_total` (counter): label `operation`
//! - `auth_flow_duration_seconds` (histogram): label `flow`

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

const FLOW_DURATION: &str = "auth_flow_duration_seconds";

/// Browser steps take anywhere from a second to several minutes.
const FLOW_DURATION_BUCKETS: &[f64] = &[0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0];

fn builder() -> PrometheusBuilder {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(FLOW_DURATION.to_string()), FLOW_DURATION_BUCKETS)
        .expect("failed to set histogram buckets")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> PrometheusHandle {
    builder()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record how long a flow request took end to end, browser step included.
pub fn record_flow_duration(flow: &str, duration_secs: f64) {
    metrics::histogram!(FLOW_DURATION, "flow" => flow.to_string()).record(duration_secs);
}
