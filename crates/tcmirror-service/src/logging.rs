use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::fmt::{MakeWriter, fmt};
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::SubscriberInitExt;

/// The `RUST_LOG` style filter used when none is set in the environment.
pub fn default_env_filter(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::OFF => "",
        LevelFilter::ERROR => "ERROR",
        LevelFilter::WARN => "WARN",
        LevelFilter::INFO => "INFO",
        LevelFilter::DEBUG => {
            "INFO,\
             tcmirror=DEBUG,\
             tcmirror_service=DEBUG,\
             tcmirror_sources=DEBUG"
        }
        LevelFilter::TRACE => {
            "INFO,\
             tcmirror=TRACE,\
             tcmirror_service=TRACE,\
             tcmirror_sources=TRACE"
        }
    }
}

/// Installs a global subscriber writing one JSON object per event, forwarding errors to Sentry.
pub fn init_json_logging<W>(env_filter: &str, make_writer: W)
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    fmt()
        .with_timer(UtcTime::rfc_3339())
        .with_target(true)
        .with_env_filter(env_filter)
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_span_list(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(make_writer)
        .finish()
        .with(sentry::integrations::tracing::layer())
        .init();
}
