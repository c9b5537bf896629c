//! Diagnostic output.
//!
//! Installs a `tracing` subscriber writing to stderr. `RUST_LOG` wins when
//! set; otherwise the directive comes from the run's [`Verbosity`].

use tracing_subscriber::EnvFilter;

use crate::utils::Verbosity;

/// Default filter directive for a verbosity level.
pub fn directive(verbosity: Verbosity) -> &'static str {
    match verbosity {
        Verbosity::Quiet => "signal_chat_export=warn",
        Verbosity::Normal => "signal_chat_export=info",
        Verbosity::Verbose => "signal_chat_export=debug",
    }
}

/// Initialize the global subscriber. Later calls are no-ops.
pub fn init(verbosity: Verbosity) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive(verbosity)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .try_init();
}
