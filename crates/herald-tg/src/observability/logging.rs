use crate::config::from_env_or_panic;
use crate::observability::GLOBAL_LABELS;
use serde::Deserialize;
use serde_with::serde_as;
use std::collections::HashMap;
use std::ops::Deref;
use tracing_subscriber::prelude::*;

pub(crate) mod prelude {
    pub(crate) use super::tracing_err;

    // We don't care if some of the imports here are not used. It's just
    // convenient not to import them manually every time a new logging macro
    // is needed.
    #[allow(unused_imports)]
    pub(crate) use tracing::{
        debug, debug_span, error, error_span, info, info_span, instrument, trace, trace_span, warn,
        warn_span, Instrument as _,
    };
}

#[must_use]
pub fn tracing_err<'a, E: std::error::Error + 'static>(err: &'a E) -> impl tracing::Value + 'a {
    err as &dyn std::error::Error
}

/// Handle to the background task that ships logs to Loki, if one was
/// configured at all.
pub struct LoggingTask {
    imp: Option<LoggingTaskImp>,
}

struct LoggingTaskImp {
    task: tokio::task::JoinHandle<()>,
    controller: tracing_loki::BackgroundTaskController,
}

impl LoggingTask {
    pub async fn shutdown(self) {
        let Some(imp) = self.imp else { return };

        tracing::info!("Waiting for the logging task to finish nicely...");

        imp.controller.shutdown().await;

        eprintln!("Stopped logging task: {:?}", imp.task.await);
    }
}

pub fn init_logging() -> LoggingTask {
    LoggingConfig::load_or_panic().init_logging()
}

#[serde_as]
#[derive(Deserialize)]
struct LoggingConfig {
    /// When unset, logs stay on stderr only. The bot is expected to run
    /// without a log shipping endpoint in development.
    loki_url: Option<url::Url>,

    #[serde_as(as = "serde_with::json::JsonString")]
    #[serde(default)]
    bot_log_labels: HashMap<String, String>,
}

impl LoggingConfig {
    fn load_or_panic() -> LoggingConfig {
        from_env_or_panic("")
    }

    fn init_logging(self) -> LoggingTask {
        let env_filter = tracing_subscriber::EnvFilter::from_env("BOT_LOG");

        let fmt = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_ansi(std::env::var("COLORS").as_deref() != Ok("0"))
            .pretty();

        let registry = tracing_subscriber::registry()
            .with(fmt)
            .with(env_filter)
            .with(tracing_error::ErrorLayer::default());

        let imp = match self.loki_url {
            None => {
                registry.init();
                None
            }
            Some(loki_url) => {
                let mut labels = self.bot_log_labels;
                labels.extend(
                    GLOBAL_LABELS
                        .iter()
                        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned())),
                );

                let (loki, controller, task) = labels
                    .into_iter()
                    .fold(tracing_loki::builder(), |builder, (key, value)| {
                        builder.label(key, value).unwrap()
                    })
                    .build_controller_url(loki_url)
                    .unwrap();

                registry.with(loki).init();

                let task = tokio::spawn(task);

                Some(LoggingTaskImp { task, controller })
            }
        };

        init_panic_hook();

        LoggingTask { imp }
    }
}

fn init_panic_hook() {
    let current_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        // It's super-important to call the default panic hook, otherwise
        // we may not see it in the logs at all, because the panic may
        // happen inside of `tracing` logging system itself.
        // See the footgun: https://github.com/rust-itertools/itertools/issues/667
        current_hook(panic_info);

        let backtrace = std::backtrace::Backtrace::capture();
        let location = panic_info.location().map(|location| {
            format!(
                "{}:{}:{}",
                location.file(),
                location.line(),
                location.column()
            )
        });

        // If the panic message was formatted using interpolated values,
        // it will be a `String`. Otherwise, it will be a `&str`.
        let payload = panic_info.payload();
        let message = payload
            .downcast_ref::<String>()
            .map(<_>::deref)
            .or_else(|| payload.downcast_ref::<&str>().map(<_>::deref))
            .unwrap_or("<unknown>");

        let span_trace = tracing_error::SpanTrace::capture();

        tracing::error!(
            target: "panic",
            thread = std::thread::current().name(),
            location,
            span_trace = %span_trace,
            backtrace = format_args!("\n{backtrace}"),
            "{message}"
        );
    }));
}
