//! Subscriber initialisation.

use tracing::Subscriber;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::{LogFormat, TracingConfig};

/// Initialize the global subscriber: an `EnvFilter` built from
/// `config.log_level` plus a fmt layer writing to stderr.
///
/// An unparseable filter directive falls back to `info` rather than failing
/// startup. Calling this twice is harmless; the second call is a no-op.
pub fn init_tracing(config: &TracingConfig) {
    let env_filter =
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = tracing_subscriber::registry()
        .with(fmt_layer(config.format))
        .with(env_filter)
        .try_init();

    if installed.is_ok() {
        tracing::debug!(
            log_level = %config.log_level,
            format = ?config.format,
            "Logging initialized"
        );
    }
}

fn fmt_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync + 'static>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    match format {
        LogFormat::Text => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_writer(std::io::stderr)
            .boxed(),
    }
}
