//! Tracing subscriber setup for the CLI.
//!
//! `RUST_LOG` takes precedence; otherwise the level follows the `-v` count.
//! Output goes to stderr so `--json` reports on stdout stay machine-readable.

use std::sync::Once;

use tracing::debug;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Default filter directive for a `-v` count.
pub fn level_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber.  Later calls are ignored.
pub fn init_tracing(verbosity: u8) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_for(verbosity)));

        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(verbosity >= 2)
            .with_line_number(verbosity >= 3);

        // Another subscriber may already be set (tests, embedding apps).
        if tracing_subscriber::registry().with(env_filter).with(fmt_layer).try_init().is_ok() {
            debug!(verbosity, "tracing initialized");
        }
    });
}
