//! Error handling facilities

use std::{fmt, iter, path::PathBuf};

use thiserror::Error;

/// Formats an [`Error`][0] and its [`source`][1]s with a separator
///
/// [0]: std::error::Error
/// [1]: std::error::Error::source
pub(crate) struct DisplayWithSources<'a> {
    /// The error (and its sources) to write
    pub(crate) error: &'a dyn std::error::Error,

    /// Separator to write between the original error and subsequent sources
    pub(crate) infix: &'static str,
}

impl fmt::Display for DisplayWithSources<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        let mut source = self.error.source();

        source
            .into_iter()
            .chain(iter::from_fn(|| {
                source = source.and_then(std::error::Error::source);
                source
            }))
            .try_for_each(|source| write!(f, "{}{source}", self.infix))
    }
}

/// Top-level errors
#[allow(missing_docs)]
#[derive(Error, Debug)]
pub(crate) enum Main {
    #[error("failed to load configuration")]
    Config(#[from] Config),

    #[error("failed to initialize observability")]
    Observability(#[from] Observability),

    #[error("failed to run")]
    Runner(#[from] Runner),
}

/// Observability initialization errors
#[allow(missing_docs)]
#[derive(Error, Debug)]
pub(crate) enum Observability {
    #[error("opentelemetry metrics error")]
    Metrics(#[from] opentelemetry::metrics::MetricsError),

    #[error("opentelemetry log error")]
    Log(#[from] opentelemetry::logs::LogError),

    #[error("failed to install global default tracing subscriber")]
    SetSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Configuration errors
#[allow(missing_docs)]
#[derive(Error, Debug)]
pub(crate) enum Config {
    #[error("{0:?} is not set; point it at a scraper config YAML file")]
    PathUnset(&'static str),

    #[error("failed to read configuration file {1:?}")]
    Read(#[source] std::io::Error, PathBuf),

    #[error("failed to parse configuration file {1:?}")]
    Parse(#[source] serde_yaml::Error, PathBuf),

    #[error("configuration is invalid: {0}")]
    Invalid(String),

    #[error(
        "enableAdminApi is set, but scraper.adminSecretEnv is not configured"
    )]
    AdminSecretEnvUnset,

    #[error(
        "enableAdminApi requires environment variable {0:?} to be set"
    )]
    AdminSecretMissing(String),

    #[error("invalid frequency string {0:?}")]
    InvalidFrequency(String),
}

/// Errors surfaced while running the scraper
#[allow(missing_docs)]
#[derive(Error, Debug)]
pub(crate) enum Runner {
    #[error("failed to bind admin API listener")]
    AdminBind(#[source] std::io::Error),

    #[error("scheduler failed to start")]
    Scheduler(#[source] Scheduler),
}

/// Scheduler errors
#[allow(missing_docs)]
#[derive(Error, Debug)]
pub(crate) enum Scheduler {
    #[error("source {0:?} has a non-positive scrape frequency")]
    InvalidFrequency(String),
}

/// Errors that can occur while processing a single scrape window. These
/// never escape [`crate::engine`]; they are recorded as self-telemetry and
/// logged instead of propagated, matching the "a tick never fails its
/// caller" design note.
#[allow(missing_docs)]
#[derive(Error, Debug)]
pub(crate) enum Window {
    #[error("authentication failed")]
    Auth(#[from] Auth),

    #[error("transport error")]
    Transport(#[from] Transport),

    #[error("response shape did not match the configured extraction path: {0}")]
    ShapeMismatch(String),

    #[error("fingerprint/state store error")]
    Store(#[from] Store),
}

/// Auth-strategy errors
#[allow(missing_docs)]
#[derive(Error, Debug)]
pub(crate) enum Auth {
    #[error("token request failed with status {0}")]
    TokenRequestFailed(reqwest::StatusCode),

    #[error("token response did not contain a usable access token")]
    NoAccessToken,

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Transport-level errors from the HTTP gateway
#[allow(missing_docs)]
#[derive(Error, Debug)]
pub(crate) enum Transport {
    #[error("refusing to request {0:?} over plaintext HTTP while enforceTls is set")]
    TlsRequired(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Fingerprint/state store errors
#[allow(missing_docs)]
#[derive(Error, Debug)]
pub(crate) enum Store {
    #[error("sqlite store error")]
    #[cfg(feature = "sqlite")]
    Sqlite(#[from] rusqlite::Error),

    #[error("sqlite store is locked and retries were exhausted")]
    SqliteLocked,

    #[error("valkey/redis store error")]
    #[cfg(feature = "valkey")]
    Valkey(#[from] fred::error::RedisError),

    #[error("background task join error")]
    Join(#[from] tokio::task::JoinError),
}
