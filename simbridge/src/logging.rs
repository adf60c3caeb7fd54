//! Console logging setup. Mirrors the shape of a `tracing`-based
//! observability layer without the OpenTelemetry export side: just an
//! `EnvFilter` plus a formatted fmt layer, chosen by [`LogFormat`].

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    pub fn parse(raw: &str) -> LogFormat {
        match raw.to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Installs the global `tracing` subscriber. `RUST_LOG` overrides `level`
/// when set.
pub fn init_tracing(level: &str, format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false);
            Registry::default().with(env_filter).with(fmt_layer).init();
        }
        LogFormat::Pretty => {
            let fmt_layer = tracing_subscriber::fmt::layer().with_target(true).with_thread_ids(false).with_file(false);
            Registry::default().with(env_filter).with(fmt_layer).init();
        }
    }
}
