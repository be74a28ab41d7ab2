pub(crate) mod logging;
mod metrics;

pub use logging::{init_logging, tracing_err, LoggingTask};
pub use metrics::init_metrics;

/// Labels attached both to every log record shipped to Loki and to every
/// metric exported to Prometheus.
pub(crate) const GLOBAL_LABELS: &[(&str, &str)] = &[
    ("app_name", env!("CARGO_PKG_NAME")),
    ("app_version", env!("CARGO_PKG_VERSION")),
];
