//! The controller keeping declared checks running on schedule

mod args;
mod libs;

pub use libs::checks::{
    render_body, render_subject, CheckScheduler, CrdStatusSink, Escalator, JobRunner,
    K8sJobRunner, Notifier, StatusSink,
};
pub use libs::{Controller, MetricsExporter};

// expose test utilities if that feature is enabled
#[cfg(feature = "test-utilities")]
pub mod test_utilities;
