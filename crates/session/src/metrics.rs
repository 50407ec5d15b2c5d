//! Flow metrics
//!
//! - `auth_flows_total` (counter): labels `flow`, `outcome`
//! - `auth_sign_outs_total` (counter): label `remote`
//! - `auth_storage_degraded_total` (counter): label `operation`
//!
//! Calls are no-ops until the host installs a recorder.

/// Record a finished sign-in, sign-up or refresh attempt.
///
/// `outcome` is `success` or an error kind label.
pub fn record_flow(flow: &str, outcome: &str) {
    metrics::counter!("auth_flows_total", "flow" => flow.to_string(), "outcome" => outcome.to_string())
        .increment(1);
}

/// Record a sign-out; `remote` is `ok`, `failed` or `skipped`.
pub fn record_sign_out(remote: &str) {
    metrics::counter!("auth_sign_outs_total", "remote" => remote.to_string()).increment(1);
}

/// Record a storage operation that fell back to the less-secure store.
pub fn record_storage_degraded(operation: &str) {
    metrics::counter!("auth_storage_degraded_total", "operation" => operation.to_string())
        .increment(1);
}
