//! Logging bootstrap.
//!
//! Components log through the `log` facade; this installs `env_logger` as the
//! backend. `RUST_LOG` overrides the default filter.

use std::sync::OnceLock;

static LOGGER_INSTALLED: OnceLock<()> = OnceLock::new();

/// Install the process-wide logger with `default_filter` (e.g. `"info"` or
/// `"caremonitor_lib=debug"`).
///
/// Returns `true` when this call installed the logger and `false` when a
/// logger was already in place (ours or the host application's).
pub fn init_logging(default_filter: &str) -> bool {
    if LOGGER_INSTALLED.get().is_some() {
        return false;
    }

    let env = env_logger::Env::default().default_filter_or(default_filter);
    let installed = env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .try_init()
        .is_ok();

    let _ = LOGGER_INSTALLED.set(());
    if installed {
        log::info!("Logging initialized (default filter: {})", default_filter);
    }
    installed
}
