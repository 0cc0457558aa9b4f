//! The modules backing the vigil controller

pub mod checks;
pub mod controller;
pub mod crds;
pub mod metrics;

pub use controller::Controller;
pub use metrics::MetricsExporter;
