//! Demo driver: orbits a camera around a synthetic plant and prints the
//! sectors a streaming scheduler should fetch first.
//!
//! Configuration is loaded from `config.ron` and can be overridden via CLI
//! flags, e.g. `cargo run -p sectorview-demo -- --backend software --top 5`.

mod scene;

use std::f32::consts::TAU;
use std::path::PathBuf;

use clap::Parser;
use glam::{Mat4, Vec3};
use sectorview_config::{CameraConfig, CliArgs, Config, default_config_dir};
use sectorview_render::Camera;
use sectorview_visibility::{VisibilityError, VisibilityPrioritizer, VisibilityWorker};
use tracing::{error, info};

/// Seed of the generated scene.
const SCENE_SEED: u64 = 42;

fn orbit_camera(config: &CameraConfig, angle: f32) -> Camera {
    let position = Vec3::new(angle.cos(), 0.35, angle.sin()) * config.orbit_radius;
    Camera::perspective(
        config.fov_y_degrees.to_radians(),
        1.0,
        config.near,
        config.far,
    )
    .look_at(position, Vec3::new(0.0, 5.0, 0.0), Vec3::Y)
}

fn run(config: &Config, args: &CliArgs) -> Result<(), VisibilityError> {
    let prioritizer = VisibilityPrioritizer::from_config(&config.prioritizer)?;
    let worker = VisibilityWorker::spawn(prioritizer)?;

    let mut models = scene::build_plant(SCENE_SEED)?;
    let diff = worker.set_models(models.clone())?;
    info!(
        models = diff.added.len(),
        sectors = models.iter().map(|m| m.sectors.len()).sum::<usize>(),
        "Registered scene"
    );

    let frames = args.frames.max(1);
    for frame in 0..frames {
        // Slide the pipe rack back and forth to exercise transform updates.
        if let Some(rack) = models.get_mut(1) {
            let offset = (frame as f32 * 0.5).sin() * 10.0;
            let transform = Mat4::from_translation(Vec3::new(15.0, 0.0, offset - 10.0));
            *rack = rack.with_transform(transform);
            worker.set_models(models.clone())?;
        }

        let angle = frame as f32 / frames as f32 * TAU;
        let ranked = worker.order_sectors_by_visibility(orbit_camera(&config.camera, angle))?;
        let stats = worker.last_stats()?;
        info!(
            frame,
            sectors = ranked.len(),
            pixels_hit = stats.pixels_hit,
            pixels = stats.pixels_scanned,
            "Ranked sectors"
        );
        println!("frame {frame}:");
        for sector in ranked.iter().take(args.top) {
            println!(
                "  {:<14} #{:<4} priority {:.4}  depth {:>3}",
                sector.model.as_str(),
                sector.sector_id,
                sector.priority,
                sector.min_depth
            );
        }
    }
    Ok(())
}

fn main() {
    let args = CliArgs::parse();

    let config_dir = args
        .config
        .clone()
        .or_else(default_config_dir)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.join("logs");
    sectorview_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    if let Err(e) = run(&config, &args) {
        error!("Prioritizer failed: {e}");
        std::process::exit(1);
    }
}
