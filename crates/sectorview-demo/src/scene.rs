//! Synthetic process-plant scene used by the demo.

use glam::{Mat4, Vec3};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;
use sectorview_render::Aabb;
use sectorview_visibility::{
    CadModel, CoverageFactors, SectorMetadata, SectorNode, VisibilityError,
};

/// Cells per axis of every generated model.
const GRID: (u32, u32, u32) = (4, 2, 4);

/// Edge length of one grid cell in model units.
const CELL: f32 = 5.0;

/// Build one model as a sparse root sector over a grid of leaf sectors.
///
/// Leaves get random fill factors so dense equipment and open pipe racks
/// compete for screen space like they would in a real plant.
fn grid_model(
    name: &str,
    rng: &mut Xoshiro256StarStar,
    transform: Mat4,
) -> Result<CadModel, VisibilityError> {
    let (nx, ny, nz) = GRID;
    let size = Vec3::new(nx as f32, ny as f32, nz as f32) * CELL;
    let root_bounds = Aabb::new(Vec3::ZERO, size);

    let mut children = Vec::new();
    let mut id = 1;
    for x in 0..nx {
        for y in 0..ny {
            for z in 0..nz {
                let min = Vec3::new(x as f32, y as f32, z as f32) * CELL;
                let coverage = CoverageFactors::new(
                    rng.gen_range(0.1..1.0),
                    rng.gen_range(0.1..1.0),
                    rng.gen_range(0.1..1.0),
                );
                children.push(SectorNode::leaf(
                    id,
                    SectorMetadata::new(Aabb::new(min, min + Vec3::splat(CELL)), coverage),
                ));
                id += 1;
            }
        }
    }

    // The root box encloses everything but holds little geometry itself.
    let root = SectorNode::with_children(
        0,
        SectorMetadata::new(root_bounds, CoverageFactors::uniform(0.1)),
        children,
    );
    CadModel::from_tree(name, &root, transform)
}

/// Three models placed around the origin. Deterministic for a given seed.
pub fn build_plant(seed: u64) -> Result<Vec<CadModel>, VisibilityError> {
    let mut rng = Xoshiro256StarStar::seed_from_u64(seed);
    let half = Vec3::new(GRID.0 as f32, 0.0, GRID.2 as f32) * CELL * 0.5;
    Ok(vec![
        grid_model("process-unit", &mut rng, Mat4::from_translation(-half))?,
        grid_model(
            "pipe-rack",
            &mut rng,
            Mat4::from_translation(Vec3::new(25.0, 0.0, 0.0) - half),
        )?,
        grid_model(
            "tank-farm",
            &mut rng,
            Mat4::from_rotation_y(std::f32::consts::FRAC_PI_4)
                * Mat4::from_translation(Vec3::new(-30.0, 0.0, 10.0) - half),
        )?,
    ])
}
