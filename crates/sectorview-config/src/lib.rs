//! Configuration for the sector visibility prioritizer and its tooling.
//!
//! Settings persist to disk as RON files, can be overridden from the command
//! line via clap, and support hot-reload detection.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    BackendKind, CameraConfig, Config, DebugConfig, MAX_CLIP_PLANES, PrioritizerConfig,
};
pub use error::ConfigError;

/// Default configuration directory (`<platform config dir>/sectorview`).
///
/// Returns `None` on platforms without a known config location.
pub fn default_config_dir() -> Option<std::path::PathBuf> {
    dirs::config_dir().map(|dir| dir.join("sectorview"))
}
