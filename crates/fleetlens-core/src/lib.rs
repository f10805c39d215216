//! Fleetlens Core -- shared error type, layered configuration, and tracing setup.
//!
//! Every other fleetlens crate reads its settings from [`config::FleetlensConfig`]
//! and logs through the subscriber installed by [`init_tracing`].

pub mod config;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Top-level error type for the fleetlens-core crate.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// An I/O error occurred while reading configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Tracing/logging initialization failed.
    #[error("tracing initialization error: {0}")]
    TracingInit(String),
}

/// Convenience alias for `Result<T, CoreError>`.
pub type CoreResult<T> = Result<T, CoreError>;

// ---------------------------------------------------------------------------
// Tracing / Logging
// ---------------------------------------------------------------------------

/// Initialize structured tracing with the given verbosity level.
///
/// # Behaviour
///
/// | `verbose` | `quiet` | `json_output` | Effect                                  |
/// |-----------|---------|---------------|-----------------------------------------|
/// | `true`    | _       | _             | TRACE level (most verbose)              |
/// | _         | `true`  | _             | ERROR level only                        |
/// | `false`   | `false` | _             | INFO level (default)                    |
/// | _         | _       | `true`        | JSON-formatted log lines                |
/// | _         | _       | `false`       | Human-readable, compact log lines       |
///
/// Log lines go to stderr: assistant hosts speak their tool protocol over
/// stdout, so nothing else may be written there.
///
/// The `RUST_LOG` environment variable, when set, takes precedence over the
/// programmatic level selection.
///
/// # Errors
///
/// Returns [`CoreError::TracingInit`] if the global subscriber has already been
/// set (i.e. this function was called more than once in the same process).
pub fn init_tracing(verbose: bool, quiet: bool, json_output: bool) -> CoreResult<()> {
    use tracing_subscriber::{EnvFilter, fmt};

    let default_level = if verbose {
        "trace"
    } else if quiet {
        "error"
    } else {
        "info"
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if json_output {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .try_init()
            .map_err(|e| CoreError::TracingInit(e.to_string()))
    } else {
        fmt()
            .compact()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .try_init()
            .map_err(|e| CoreError::TracingInit(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
