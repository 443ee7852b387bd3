//! Logging setup.
//!
//! Modules pull the macros in through [`prelude`] so every log line in the
//! crate goes through the same `tracing` front end.

use time::macros::format_description;
use tracing_subscriber::{
    EnvFilter, fmt, fmt::time::UtcTime, layer::SubscriberExt, util::SubscriberInitExt,
};

pub mod prelude {
    pub use tracing::{debug, error, info, trace, warn};
}

/// Install the global subscriber.
///
/// Logs go to journald when running under systemd (detected through
/// `JOURNAL_STREAM`) and to stdout otherwise. The filter comes from
/// `RUST_LOG`, defaulting to `info`.
pub fn init_journald_or_stdout() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var_os("JOURNAL_STREAM").is_some() {
        if let Ok(journald) = tracing_journald::layer() {
            registry.with(journald).init();
            return;
        }
    }

    let timer = UtcTime::new(format_description!(
        "[hour]:[minute]:[second].[subsecond digits:3]"
    ));
    registry
        .with(fmt::layer().with_timer(timer).with_target(false))
        .init();
}
