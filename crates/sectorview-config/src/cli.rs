//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::{BackendKind, Config};

/// sectorview command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug)]
#[command(name = "sectorview", about = "Sector visibility prioritizer")]
pub struct CliArgs {
    /// Coverage target width in pixels.
    #[arg(long)]
    pub width: Option<u32>,

    /// Coverage target height in pixels.
    #[arg(long)]
    pub height: Option<u32>,

    /// Coverage backend.
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Number of camera positions to evaluate.
    #[arg(long, default_value_t = 8)]
    pub frames: u32,

    /// How many ranked sectors to print per frame.
    #[arg(long, default_value_t = 10)]
    pub top: usize,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(w) = args.width {
            self.prioritizer.target_width = w;
        }
        if let Some(h) = args.height {
            self.prioritizer.target_height = h;
        }
        if let Some(backend) = args.backend {
            self.prioritizer.backend = backend;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
