//! Configuration structs with sensible defaults and RON persistence.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Upper bound on user clip planes, mirrored by the coverage shader.
pub const MAX_CLIP_PLANES: usize = 8;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Coverage pass and aggregation settings.
    pub prioritizer: PrioritizerConfig,
    /// Camera used by the demo driver.
    pub camera: CameraConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Which coverage backend renders the proxy pass.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
pub enum BackendKind {
    /// Try the GPU, fall back to the CPU rasterizer when no adapter exists.
    #[default]
    Auto,
    /// wgpu off-screen pass; fails if no adapter is available.
    Gpu,
    /// CPU rasterizer with identical encoding.
    Software,
}

/// Settings for the low-resolution coverage pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PrioritizerConfig {
    /// Width of the off-screen coverage target in pixels.
    pub target_width: u32,
    /// Height of the off-screen coverage target in pixels.
    pub target_height: u32,
    /// Backend selection.
    pub backend: BackendKind,
    /// Create a diagnostics surface next to the primary target.
    pub debug_surface: bool,
    /// Diagnostics surface width in pixels.
    pub debug_surface_width: u32,
    /// Diagnostics surface height in pixels.
    pub debug_surface_height: u32,
    /// Initial clip planes as `[nx, ny, nz, constant]`.
    pub clip_planes: Vec<[f32; 4]>,
    /// Clip only where a point is outside every plane (instead of any plane).
    pub clip_intersection: bool,
}

/// Camera parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CameraConfig {
    /// Vertical field of view in degrees.
    pub fov_y_degrees: f32,
    /// Near clip distance.
    pub near: f32,
    /// Far clip distance; also the depth normalisation range.
    pub far: f32,
    /// Orbit radius of the demo camera around the scene center.
    pub orbit_radius: f32,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Write JSON logs even in release builds.
    pub log_to_file: bool,
}

impl Default for PrioritizerConfig {
    fn default() -> Self {
        Self {
            target_width: 64,
            target_height: 64,
            backend: BackendKind::Auto,
            debug_surface: false,
            debug_surface_width: 256,
            debug_surface_height: 256,
            clip_planes: Vec::new(),
            clip_intersection: false,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov_y_degrees: 60.0,
            near: 0.1,
            far: 500.0,
            orbit_radius: 60.0,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_to_file: false,
        }
    }
}

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join("config.ron");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            config.validate()?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join("config.ron");
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join("config.ron");
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
        new_config.validate()?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    /// Reject values that parse but cannot drive the coverage pass.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.prioritizer;
        if p.target_width == 0 || p.target_height == 0 {
            return Err(ConfigError::InvalidValue {
                field: "prioritizer.target_width/target_height",
                reason: format!("must be non-zero, got {}x{}", p.target_width, p.target_height),
            });
        }
        if p.debug_surface && (p.debug_surface_width == 0 || p.debug_surface_height == 0) {
            return Err(ConfigError::InvalidValue {
                field: "prioritizer.debug_surface_width/debug_surface_height",
                reason: "debug surface enabled with a zero dimension".to_string(),
            });
        }
        if p.clip_planes.len() > MAX_CLIP_PLANES {
            return Err(ConfigError::InvalidValue {
                field: "prioritizer.clip_planes",
                reason: format!("{} planes, at most {MAX_CLIP_PLANES}", p.clip_planes.len()),
            });
        }
        let c = &self.camera;
        if !(c.near > 0.0 && c.far > c.near) {
            return Err(ConfigError::InvalidValue {
                field: "camera.near/far",
                reason: format!("need 0 < near < far, got near={} far={}", c.near, c.far),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializes() {
        let config = Config::default();
        let ron_str =
            ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::new().depth_limit(3))
                .unwrap();
        assert!(ron_str.contains("target_width: 64"));
        assert!(ron_str.contains("backend: Auto"));
    }

    #[test]
    fn test_config_roundtrip() {
        let mut config = Config::default();
        config.prioritizer.clip_planes.push([0.0, 1.0, 0.0, -2.5]);
        config.prioritizer.backend = BackendKind::Software;
        let ron_str = ron::to_string(&config).unwrap();
        let deserialized: Config = ron::from_str(&ron_str).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_missing_section_uses_default() {
        let ron_str = "(prioritizer: (target_width: 128))";
        let config: Config = ron::from_str(ron_str).unwrap();
        assert_eq!(config.prioritizer.target_width, 128);
        assert_eq!(config.prioritizer.target_height, 64);
        assert_eq!(config.camera, CameraConfig::default());
    }

    #[test]
    fn test_extra_field_ignored() {
        let result: Result<Config, _> = ron::from_str("(future_setting: true)");
        assert!(result.is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.prioritizer.target_width = 96;
        config.prioritizer.clip_intersection = true;
        config.camera.far = 2000.0;

        config.save(dir.path()).unwrap();
        let loaded = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_or_create_writes_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert!(dir.path().join("config.ron").exists());
    }

    #[test]
    fn test_reload_detects_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();

        let mut modified = config.clone();
        modified.prioritizer.target_height = 32;
        modified.save(dir.path()).unwrap();

        let result = config.reload(dir.path()).unwrap();
        assert_eq!(result.unwrap().prioritizer.target_height, 32);
    }

    #[test]
    fn test_reload_no_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();
        assert!(config.reload(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_invalid_ron_produces_error() {
        let result: Result<Config, _> = ron::from_str("{{not valid}}");
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_target_rejected() {
        let mut config = Config::default();
        config.prioritizer.target_width = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_too_many_clip_planes_rejected() {
        let mut config = Config::default();
        config.prioritizer.clip_planes = vec![[1.0, 0.0, 0.0, 0.0]; MAX_CLIP_PLANES + 1];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_depth_range_rejected() {
        let mut config = Config::default();
        config.camera.near = 10.0;
        config.camera.far = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_file_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.ron"),
            "(prioritizer: (target_width: 0))",
        )
        .unwrap();
        assert!(matches!(
            Config::load_or_create(dir.path()),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
