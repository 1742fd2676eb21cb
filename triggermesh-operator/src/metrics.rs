//! Operator metrics.

pub const METRIC_RECONCILE_TOTAL: &str = "triggermesh_reconcile_total";
pub const METRIC_RECONCILE_ERRORS: &str = "triggermesh_reconcile_errors_total";
pub const METRIC_WATCHER_ERRORS: &str = "triggermesh_watcher_errors_total";
pub const METRIC_WORKQUEUE_ADDS: &str = "triggermesh_workqueue_adds_total";

/// Register the descriptions of every metric emitted by the operator.
pub fn register_metrics() {
    metrics::register_counter!(METRIC_RECONCILE_TOTAL, metrics::Unit::Count, "reconciliations performed, by controller");
    metrics::register_counter!(METRIC_RECONCILE_ERRORS, metrics::Unit::Count, "reconciliations which returned an error, by controller");
    metrics::register_counter!(METRIC_WATCHER_ERRORS, metrics::Unit::Count, "k8s watcher errors, by kind");
    metrics::register_counter!(METRIC_WORKQUEUE_ADDS, metrics::Unit::Count, "keys added to work queues, by queue");
}
