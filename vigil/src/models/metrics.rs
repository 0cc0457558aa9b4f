//! The metric samples emitted by check schedulers

use super::checks::HealthStatus;

/// The labels attached to every check metric sample
#[derive(Debug, Clone, PartialEq)]
pub struct MetricLabels {
    /// The name of the check
    pub name: String,
    /// The namespace the check lives in
    pub namespace: String,
    /// The health of the check when the sample was taken
    pub status: HealthStatus,
    /// Whether the check was escalated when the sample was taken
    pub escalated: bool,
}

/// A single sample bound for the external metrics sink
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsQueueItem {
    /// The metric this sample updates
    pub metric: String,
    /// The labels for this sample
    pub labels: MetricLabels,
    /// The value for this sample when it is not a counter bump
    pub value: Option<f64>,
}

impl MetricsQueueItem {
    /// Build a counter bump sample
    ///
    /// # Arguments
    ///
    /// * `metric` - The metric this sample updates
    /// * `labels` - The labels for this sample
    pub fn count<T: Into<String>>(metric: T, labels: MetricLabels) -> Self {
        MetricsQueueItem {
            metric: metric.into(),
            labels,
            value: None,
        }
    }

    /// Build a gauge sample
    ///
    /// # Arguments
    ///
    /// * `metric` - The metric this sample updates
    /// * `labels` - The labels for this sample
    /// * `value` - The value to set
    pub fn gauge<T: Into<String>>(metric: T, labels: MetricLabels, value: f64) -> Self {
        MetricsQueueItem {
            metric: metric.into(),
            labels,
            value: Some(value),
        }
    }
}
