//! Structured logging for sectorview binaries.
//!
//! Library crates only speak the `log` facade. Binaries call [`init_logging`]
//! once, which installs a `tracing` subscriber that also captures `log`
//! records: console output with uptime timestamps and targets, plus a JSON
//! file in debug builds (or when `debug.log_to_file` is set) for post-mortem
//! analysis of prioritizer runs.

use sectorview_config::Config;
use std::path::Path;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when neither `RUST_LOG` nor the config specifies one.
///
/// The wgpu stack is very chatty at `info`; keep it at `warn`.
pub const DEFAULT_FILTER: &str = "info,wgpu=warn,naga=warn";

/// Name of the JSON log file written under `log_dir`.
pub const LOG_FILE_NAME: &str = "sectorview.log";

/// Initialize the global tracing subscriber.
///
/// * `log_dir` - directory for the JSON log file
/// * `debug_build` - enables the file layer
/// * `config` - optional config whose `debug.log_level` replaces the default
///   filter and whose `debug.log_to_file` enables the file layer in any build
///
/// `RUST_LOG` always wins over both.
///
/// ```no_run
/// use sectorview_log::init_logging;
///
/// init_logging(None, false, None);
/// ```
pub fn init_logging(log_dir: Option<&Path>, debug_build: bool, config: Option<&Config>) {
    let filter_str = filter_from_config(config);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_level(true)
        .with_timer(fmt::time::uptime());

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    if file_logging_enabled(debug_build, config)
        && let Some(log_dir) = log_dir
        && std::fs::create_dir_all(log_dir).is_ok()
        && let Ok(log_file) = std::fs::File::create(log_dir.join(LOG_FILE_NAME))
    {
        let file_layer = fmt::layer()
            .with_writer(log_file)
            .with_ansi(false)
            .with_target(true)
            .with_timer(fmt::time::uptime())
            .json();

        subscriber.with(file_layer).init();
        return;
    }

    subscriber.init();
}

/// Whether the JSON file layer should be installed.
pub fn file_logging_enabled(debug_build: bool, config: Option<&Config>) -> bool {
    debug_build || config.is_some_and(|c| c.debug.log_to_file)
}

/// Resolve the filter string from an optional config.
///
/// A plain level such as `debug` from the config is widened with the wgpu/naga
/// quieting directives so GPU validation chatter stays out of the way.
pub fn filter_from_config(config: Option<&Config>) -> String {
    match config.map(|c| c.debug.log_level.trim()) {
        Some(level) if !level.is_empty() && level.contains('=') => level.to_string(),
        Some(level) if !level.is_empty() => format!("{level},wgpu=warn,naga=warn"),
        _ => DEFAULT_FILTER.to_string(),
    }
}

/// Create an `EnvFilter` with the default filter string.
pub fn default_env_filter() -> EnvFilter {
    EnvFilter::new(DEFAULT_FILTER)
}
