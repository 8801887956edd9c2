//! Facilities for observing runtime behavior
//!
//! Ported down from `examples/avdb13-grapevine/src/observability.rs`: that
//! module layers a reloadable `EnvFilter`, an optional `tracing-opentelemetry`
//! trace bridge, an optional `tracing-flame` profiling layer, and a
//! Prometheus-backed metrics registry onto a single `tracing_subscriber`
//! `Registry`. This crate keeps only the `tracing_subscriber` log layer —
//! metrics and logs are OTLP, not Prometheus, and are installed by
//! [`crate::telemetry`] instead; there is no request-tracing surface to
//! bridge and no flame-graph profiling need here.

use tracing_subscriber::{layer::SubscriberExt as _, EnvFilter, Registry};

use crate::error;

/// Installs the process-wide `tracing` subscriber: a compact formatter
/// filtered by `RUST_LOG` if set, else by `log_level` from `scraper:` config.
pub(crate) fn init(default_level: &str) -> Result<(), error::Observability> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_owned()));

    let subscriber = Registry::default()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true));

    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}
