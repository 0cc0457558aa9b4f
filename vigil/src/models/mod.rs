//! The models shared across vigil

mod checks;
mod metrics;

pub use checks::{
    Check, CheckConfig, CheckCrdStatus, CheckSpec, CheckState, CheckStatus, CheckTemplate,
    EscalationTarget, HealthStatus, Interval, JobStatus, parse_timestamp, write_timestamp,
};
pub use metrics::{MetricLabels, MetricsQueueItem};
