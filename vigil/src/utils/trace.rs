//! Sets up tracing for vigil on stdout/stderr

use tracing_subscriber::prelude::*;

use crate::conf::Tracing;

/// Setup our local tracer
///
/// # Arguments
///
/// * `name` - The name of the service to trace
/// * `trace_conf` - The tracing settings to use
pub fn setup(name: &str, trace_conf: &Tracing) {
    // build our local tracing layer with the configured level
    let local = tracing_subscriber::fmt::layer().with_filter(trace_conf.local.level.to_filter());
    // init our tracing registry
    tracing_subscriber::registry()
        .with(local)
        .try_init()
        .expect("Failed to register stdout registry");
    tracing::event!(
        tracing::Level::INFO,
        service = name,
        level = ?trace_conf.local.level,
        "logging to stdout"
    );
}
