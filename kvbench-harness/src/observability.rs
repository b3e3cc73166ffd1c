//! Logging and error reporting setup.

use std::env;
use std::io::IsTerminal;

use sentry::integrations::tracing as sentry_tracing;
use tracing::Level;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, prelude::*};

use crate::config::{Config, LogFormat};

/// Initializes Sentry if a DSN is configured.
///
/// The returned guard flushes pending events when dropped.
pub fn init_sentry(config: &Config) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry.dsn.as_deref()?;

    Some(sentry::init(sentry::ClientOptions {
        dsn: dsn.parse().ok(),
        environment: config.sentry.environment.clone(),
        release: sentry::release_name!(),
        sample_rate: config.sentry.sample_rate,
        enable_logs: true,
        ..Default::default()
    }))
}

/// Installs the global tracing subscriber, writing to stderr.
pub fn init_tracing(config: &Config) {
    // Same as the default filter, except it converts warnings into events
    // and also sends everything at or above INFO as logs instead of breadcrumbs.
    let sentry_layer = config.sentry.is_enabled().then(|| {
        sentry_tracing::layer().event_filter(|metadata| match *metadata.level() {
            Level::ERROR | Level::WARN => {
                sentry_tracing::EventFilter::Event | sentry_tracing::EventFilter::Log
            }
            Level::INFO => sentry_tracing::EventFilter::Log,
            Level::DEBUG | Level::TRACE => sentry_tracing::EventFilter::Ignore,
        })
    });

    let format = match config.logging.format {
        LogFormat::Auto if std::io::stderr().is_terminal() => LogFormat::Pretty,
        LogFormat::Auto => LogFormat::Simplified,
        format => format,
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);
    let fmt_layer = match format {
        LogFormat::Pretty => fmt_layer.pretty().boxed(),
        LogFormat::Json => fmt_layer.json().flatten_event(true).boxed(),
        LogFormat::Auto | LogFormat::Simplified => fmt_layer.with_ansi(false).compact().boxed(),
    };

    let (level, env_filter) = parse_rust_log(config.logging.level);

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(level))
        .with(sentry_layer)
        .with(env_filter)
        .init();
}

/// Resolves the effective level and filter directives.
///
/// A plain level in `RUST_LOG` overrides the configured level. Anything else in `RUST_LOG` is
/// used literally as filter directives.
fn parse_rust_log(configured: LevelFilter) -> (LevelFilter, EnvFilter) {
    let level = match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(value) => match value.parse::<LevelFilter>() {
            Ok(level) => level,
            Err(_) => return (LevelFilter::TRACE, EnvFilter::new(value)),
        },
        Err(_) => configured,
    };

    // This is the maximum verbosity that will be logged, we filter this down to `level`.
    let env_filter = EnvFilter::new(
        "INFO,\
        kvbench=TRACE,\
        kvbench_harness=TRACE,\
        kvbench_service=TRACE,\
        ",
    );

    (level, env_filter)
}
