//! CPU rasterizer producing the same encoded image as the GPU pass.
//!
//! Used when no adapter is available and by tests that need exact pixels.

use glam::{Mat4, Vec3, Vec4};
use rustc_hash::FxHashMap;
use sectorview_render::{ReadbackError, UNIT_CUBE_INDICES};

use super::{CoverageBackend, CoverageView, debug_color};
use crate::clipping::ClippingState;
use crate::coverage::{keep_probability, keeps_fragment, projected_fraction};
use crate::encoding::{BACKGROUND, BYTES_PER_SAMPLE, encode_sample, quantize_depth};
use crate::error::VisibilityError;
use crate::model::ModelKey;
use crate::proxy::{CoverageProxyBuilder, ProxyGroup, ProxyInstance};

/// Reverse-Z clear value; anything closer than the far plane wins.
const DEPTH_CLEAR: f32 = 0.0;

/// Barycentric slack so pixel centers on a shared edge are never dropped by
/// both triangles.
const EDGE_TOLERANCE: f32 = 1e-5;

/// Color and depth planes of one target.
struct Raster {
    width: u32,
    height: u32,
    color: Vec<u8>,
    depth: Vec<f32>,
}

impl Raster {
    fn new(what: &'static str, width: u32, height: u32) -> Result<Self, VisibilityError> {
        if width == 0 || height == 0 {
            return Err(VisibilityError::ResourceExhausted {
                what,
                reason: format!("degenerate size {width}x{height}"),
            });
        }
        let pixels = width as usize * height as usize;
        let mut color = Vec::new();
        let mut depth = Vec::new();
        let exhausted = |e: std::collections::TryReserveError| VisibilityError::ResourceExhausted {
            what,
            reason: e.to_string(),
        };
        color.try_reserve_exact(pixels * BYTES_PER_SAMPLE).map_err(exhausted)?;
        depth.try_reserve_exact(pixels).map_err(exhausted)?;
        color.resize(pixels * BYTES_PER_SAMPLE, 0);
        depth.resize(pixels, DEPTH_CLEAR);
        Ok(Self {
            width,
            height,
            color,
            depth,
        })
    }

    fn clear(&mut self) {
        for px in self.color.chunks_exact_mut(BYTES_PER_SAMPLE) {
            px.copy_from_slice(&BACKGROUND);
        }
        self.depth.fill(DEPTH_CLEAR);
    }

    fn copy_to(&self, dst: &mut [u8]) -> Result<(), VisibilityError> {
        let needed = self.color.len();
        if dst.len() < needed {
            return Err(ReadbackError::DestinationTooSmall {
                actual: dst.len(),
                needed,
            }
            .into());
        }
        dst[..needed].copy_from_slice(&self.color);
        Ok(())
    }
}

/// A clip-space vertex carrying its world position.
#[derive(Clone, Copy)]
struct ClipVertex {
    clip: Vec4,
    world: Vec3,
}

impl ClipVertex {
    fn lerp(a: &Self, b: &Self, t: f32) -> Self {
        Self {
            clip: a.clip.lerp(b.clip, t),
            world: a.world.lerp(b.world, t),
        }
    }
}

/// Screen-space vertex ready for scan conversion.
#[derive(Clone, Copy)]
struct ScreenVertex {
    x: f32,
    y: f32,
    /// NDC depth, 1 at the near plane.
    z: f32,
    inv_w: f32,
    world_over_w: Vec3,
}

/// Per-instance state shared by all of its fragments.
struct Fragment<'a> {
    global_id: u32,
    keep: f32,
    view: &'a CoverageView,
    clipping: &'a ClippingState,
    shade: fn(u32, u8) -> [u8; 4],
}

/// CPU implementation of [`CoverageBackend`].
pub struct SoftwareCoverageBackend {
    target: Raster,
    debug: Option<Raster>,
    groups: FxHashMap<ModelKey, Vec<ProxyInstance>>,
    released: bool,
}

impl SoftwareCoverageBackend {
    pub fn new(width: u32, height: u32) -> Result<Self, VisibilityError> {
        let mut target = Raster::new("coverage target", width, height)?;
        target.clear();
        Ok(Self {
            target,
            debug: None,
            groups: FxHashMap::default(),
            released: false,
        })
    }

    fn ensure_live(&self) -> Result<(), VisibilityError> {
        if self.released {
            return Err(VisibilityError::Released);
        }
        Ok(())
    }

    fn draw(
        raster: &mut Raster,
        groups: &FxHashMap<ModelKey, Vec<ProxyInstance>>,
        view: &CoverageView,
        scene: &CoverageProxyBuilder,
        clipping: &ClippingState,
        shade: fn(u32, u8) -> [u8; 4],
    ) {
        raster.clear();
        for group in scene.groups() {
            let Some(instances) = groups.get(&group.key) else {
                log::warn!("Proxy group '{}' was never uploaded; skipping", group.key);
                continue;
            };
            let inverse = group.transform.inverse();
            for instance in instances {
                let keep = instance_keep_probability(instance, &group.transform, &inverse, view);
                if keep <= 0.0 {
                    continue;
                }
                let fragment = Fragment {
                    global_id: instance.global_id,
                    keep,
                    view,
                    clipping,
                    shade,
                };
                let corners = instance
                    .bounds()
                    .corners()
                    .map(|c| group.transform.transform_point3(c));
                for tri in UNIT_CUBE_INDICES.chunks_exact(3) {
                    let vertices = [0, 1, 2].map(|k| {
                        let world = corners[tri[k] as usize];
                        ClipVertex {
                            clip: view.view_projection * world.extend(1.0),
                            world,
                        }
                    });
                    draw_triangle(raster, &vertices, &fragment);
                }
            }
        }
    }
}

/// Keep probability for one proxy box, evaluated once per instance.
fn instance_keep_probability(
    instance: &ProxyInstance,
    transform: &Mat4,
    inverse: &Mat4,
    view: &CoverageView,
) -> f32 {
    let bounds = instance.bounds();
    let to_center = transform.transform_point3(bounds.center()) - view.camera_position;
    let factor = instance
        .coverage_factors()
        .for_view(inverse.transform_vector3(to_center));
    let radius = transform.transform_vector3(bounds.extents()).length();
    let fraction = projected_fraction(
        radius,
        to_center.length(),
        view.projection_scale,
        view.orthographic,
    );
    keep_probability(factor, fraction)
}

/// Sutherland-Hodgman against one homogeneous half-space `dist(v) >= 0`.
fn clip_polygon(input: &[ClipVertex], dist: impl Fn(&Vec4) -> f32) -> Vec<ClipVertex> {
    let mut output = Vec::with_capacity(input.len() + 2);
    for (i, current) in input.iter().enumerate() {
        let next = &input[(i + 1) % input.len()];
        let (dc, dn) = (dist(&current.clip), dist(&next.clip));
        if dc >= 0.0 {
            output.push(*current);
        }
        if (dc >= 0.0) != (dn >= 0.0) {
            output.push(ClipVertex::lerp(current, next, dc / (dc - dn)));
        }
    }
    output
}

fn draw_triangle(raster: &mut Raster, vertices: &[ClipVertex; 3], fragment: &Fragment<'_>) {
    // Near: z <= w. Far: z >= 0.
    let polygon = clip_polygon(vertices, |c| c.w - c.z);
    if polygon.len() < 3 {
        return;
    }
    let polygon = clip_polygon(&polygon, |c| c.z);
    if polygon.len() < 3 {
        return;
    }

    let (w, h) = (raster.width as f32, raster.height as f32);
    let screen: Vec<ScreenVertex> = polygon
        .iter()
        .map(|v| {
            let inv_w = 1.0 / v.clip.w;
            ScreenVertex {
                x: (v.clip.x * inv_w * 0.5 + 0.5) * w,
                y: (0.5 - v.clip.y * inv_w * 0.5) * h,
                z: v.clip.z * inv_w,
                inv_w,
                world_over_w: v.world * inv_w,
            }
        })
        .collect();

    for i in 1..screen.len() - 1 {
        scan_triangle(raster, [screen[0], screen[i], screen[i + 1]], fragment);
    }
}

fn edge(a: &ScreenVertex, b: &ScreenVertex, px: f32, py: f32) -> f32 {
    (b.x - a.x) * (py - a.y) - (b.y - a.y) * (px - a.x)
}

fn scan_triangle(raster: &mut Raster, tri: [ScreenVertex; 3], fragment: &Fragment<'_>) {
    let [v0, v1, v2] = tri;
    let area = edge(&v0, &v1, v2.x, v2.y);
    if area.abs() <= f32::EPSILON {
        return;
    }

    let min_x = v0.x.min(v1.x).min(v2.x).floor().max(0.0) as u32;
    let min_y = v0.y.min(v1.y).min(v2.y).floor().max(0.0) as u32;
    let max_x = (v0.x.max(v1.x).max(v2.x).ceil() as u32).min(raster.width);
    let max_y = (v0.y.max(v1.y).max(v2.y).ceil() as u32).min(raster.height);

    for py in min_y..max_y {
        for px in min_x..max_x {
            let (sx, sy) = (px as f32 + 0.5, py as f32 + 0.5);
            let b0 = edge(&v1, &v2, sx, sy) / area;
            let b1 = edge(&v2, &v0, sx, sy) / area;
            let b2 = edge(&v0, &v1, sx, sy) / area;
            if b0 < -EDGE_TOLERANCE || b1 < -EDGE_TOLERANCE || b2 < -EDGE_TOLERANCE {
                continue;
            }

            let idx = (py * raster.width + px) as usize;
            let z = b0 * v0.z + b1 * v1.z + b2 * v2.z;
            if z < raster.depth[idx] {
                continue;
            }

            let inv_w = b0 * v0.inv_w + b1 * v1.inv_w + b2 * v2.inv_w;
            let world =
                (v0.world_over_w * b0 + v1.world_over_w * b1 + v2.world_over_w * b2) / inv_w;
            if fragment.clipping.is_clipped(world) || !keeps_fragment(px, py, fragment.keep) {
                continue;
            }

            let depth = quantize_depth(
                world.distance(fragment.view.camera_position),
                fragment.view.far,
            );
            raster.depth[idx] = z;
            let offset = idx * BYTES_PER_SAMPLE;
            raster.color[offset..offset + BYTES_PER_SAMPLE]
                .copy_from_slice(&(fragment.shade)(fragment.global_id, depth));
        }
    }
}

impl CoverageBackend for SoftwareCoverageBackend {
    fn name(&self) -> &'static str {
        "software"
    }

    fn upload_group(&mut self, group: &ProxyGroup) -> Result<(), VisibilityError> {
        self.ensure_live()?;
        self.groups.insert(group.key.clone(), group.instances.clone());
        Ok(())
    }

    fn release_group(&mut self, key: &ModelKey) {
        self.groups.remove(key);
    }

    fn target_size(&self) -> (u32, u32) {
        (self.target.width, self.target.height)
    }

    fn resize_target(&mut self, width: u32, height: u32) -> Result<(), VisibilityError> {
        self.ensure_live()?;
        if self.target_size() != (width, height) {
            self.target = Raster::new("coverage target", width, height)?;
            self.target.clear();
        }
        Ok(())
    }

    fn render(
        &mut self,
        view: &CoverageView,
        scene: &CoverageProxyBuilder,
        clipping: &ClippingState,
    ) -> Result<(), VisibilityError> {
        self.ensure_live()?;
        Self::draw(&mut self.target, &self.groups, view, scene, clipping, encode_sample);
        Ok(())
    }

    fn read_pixels(&mut self, dst: &mut [u8]) -> Result<(), VisibilityError> {
        self.ensure_live()?;
        self.target.copy_to(dst)
    }

    fn create_debug_surface(&mut self, width: u32, height: u32) -> Result<(), VisibilityError> {
        self.ensure_live()?;
        if self.debug.is_some() {
            return Err(VisibilityError::DebugSurfaceExists);
        }
        let mut raster = Raster::new("debug surface", width, height)?;
        raster.clear();
        self.debug = Some(raster);
        Ok(())
    }

    fn has_debug_surface(&self) -> bool {
        self.debug.is_some()
    }

    fn render_debug(
        &mut self,
        view: &CoverageView,
        scene: &CoverageProxyBuilder,
        clipping: &ClippingState,
    ) -> Result<(), VisibilityError> {
        self.ensure_live()?;
        if let Some(raster) = self.debug.as_mut() {
            Self::draw(raster, &self.groups, view, scene, clipping, debug_color);
        }
        Ok(())
    }

    fn read_debug_pixels(&mut self, dst: &mut Vec<u8>) -> Result<(u32, u32), VisibilityError> {
        self.ensure_live()?;
        let raster = self
            .debug
            .as_ref()
            .ok_or_else(|| VisibilityError::ResourceExhausted {
                what: "debug surface",
                reason: "no debug surface was created".into(),
            })?;
        dst.clear();
        dst.extend_from_slice(&raster.color);
        Ok((raster.width, raster.height))
    }

    fn live_resources(&self) -> usize {
        if self.released {
            return 0;
        }
        2 + self.debug.as_ref().map_or(0, |_| 2) + self.groups.len()
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.groups.clear();
        self.debug = None;
        self.target.color = Vec::new();
        self.target.depth = Vec::new();
        self.released = true;
        log::debug!("Software coverage backend released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::CoverageFactors;
    use crate::encoding::decode_sample;
    use crate::id_space::SectorIdSpace;
    use crate::model::{CadModel, SectorMetadata};
    use sectorview_render::{Aabb, Camera};

    fn scene_with(models: &[CadModel]) -> (CoverageProxyBuilder, SoftwareCoverageBackend) {
        let mut ids = SectorIdSpace::new();
        let mut scene = CoverageProxyBuilder::new();
        scene.set_models(models, &mut ids).unwrap();
        let mut backend = SoftwareCoverageBackend::new(32, 32).unwrap();
        for group in scene.groups() {
            backend.upload_group(group).unwrap();
        }
        (scene, backend)
    }

    fn camera_at(position: Vec3, target: Vec3) -> Camera {
        Camera::perspective(std::f32::consts::FRAC_PI_3, 1.0, 0.1, 100.0).look_at(
            position,
            target,
            Vec3::Y,
        )
    }

    fn render(
        backend: &mut SoftwareCoverageBackend,
        scene: &CoverageProxyBuilder,
        camera: &Camera,
        clipping: &ClippingState,
    ) -> Vec<u8> {
        backend
            .render(&CoverageView::from_camera(camera), scene, clipping)
            .unwrap();
        let (w, h) = backend.target_size();
        let mut pixels = vec![0; (w * h * 4) as usize];
        backend.read_pixels(&mut pixels).unwrap();
        pixels
    }

    fn sample_at(pixels: &[u8], x: usize, y: usize) -> Option<crate::encoding::DecodedSample> {
        let i = (y * 32 + x) * 4;
        decode_sample([pixels[i], pixels[i + 1], pixels[i + 2], pixels[i + 3]])
    }

    fn ids_in(pixels: &[u8]) -> Vec<u32> {
        let mut ids: Vec<u32> = pixels
            .chunks_exact(4)
            .filter_map(|p| decode_sample([p[0], p[1], p[2], p[3]]))
            .map(|s| s.global_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    fn cube_model(name: &str, center: Vec3, half: f32) -> CadModel {
        CadModel::new(
            name,
            vec![SectorMetadata::solid(Aabb::new(
                center - Vec3::splat(half),
                center + Vec3::splat(half),
            ))],
            Mat4::IDENTITY,
        )
    }

    #[test]
    fn test_empty_scene_is_background() {
        let (scene, mut backend) = scene_with(&[]);
        let pixels = render(
            &mut backend,
            &scene,
            &camera_at(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO),
            &ClippingState::none(),
        );
        assert!(pixels.chunks_exact(4).all(|p| p == BACKGROUND));
    }

    #[test]
    fn test_box_in_front_is_drawn_at_center() {
        let (scene, mut backend) = scene_with(&[cube_model("a", Vec3::ZERO, 1.0)]);
        let pixels = render(
            &mut backend,
            &scene,
            &camera_at(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO),
            &ClippingState::none(),
        );
        let sample = sample_at(&pixels, 16, 16).unwrap();
        assert_eq!(sample.global_id, 0);
        // Front face is 9 units away from a camera with far = 100.
        assert_eq!(sample.depth, quantize_depth(9.0, 100.0));
        // Corners stay empty.
        assert_eq!(&pixels[0..4], &BACKGROUND);
    }

    #[test]
    fn test_box_behind_camera_is_not_drawn() {
        let (scene, mut backend) = scene_with(&[cube_model("a", Vec3::new(0.0, 0.0, 20.0), 1.0)]);
        let pixels = render(
            &mut backend,
            &scene,
            &camera_at(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO),
            &ClippingState::none(),
        );
        assert!(ids_in(&pixels).is_empty());
    }

    #[test]
    fn test_nearer_box_occludes() {
        let models = [
            CadModel::new(
                "a",
                vec![
                    // Far, large.
                    SectorMetadata::solid(Aabb::new(Vec3::splat(-3.0), Vec3::new(3.0, 3.0, -2.0))),
                    // Near, small.
                    SectorMetadata::solid(Aabb::new(Vec3::splat(-0.5), Vec3::splat(0.5))),
                ],
                Mat4::IDENTITY,
            ),
        ];
        let (scene, mut backend) = scene_with(&models);
        let pixels = render(
            &mut backend,
            &scene,
            &camera_at(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO),
            &ClippingState::none(),
        );
        assert_eq!(sample_at(&pixels, 16, 16).unwrap().global_id, 1);
        assert_eq!(ids_in(&pixels), vec![0, 1]);
    }

    #[test]
    fn test_camera_inside_box_fills_view() {
        let (scene, mut backend) = scene_with(&[cube_model("a", Vec3::ZERO, 5.0)]);
        let pixels = render(
            &mut backend,
            &scene,
            &camera_at(Vec3::ZERO, Vec3::new(0.0, 0.0, -1.0)),
            &ClippingState::none(),
        );
        assert!(pixels.chunks_exact(4).all(|p| p != BACKGROUND));
    }

    #[test]
    fn test_clip_plane_removes_box() {
        let (scene, mut backend) = scene_with(&[cube_model("a", Vec3::ZERO, 1.0)]);
        // keep x >= 5
        let clipping =
            ClippingState::new(&[crate::clipping::ClipPlane::new(Vec3::X, -5.0)], false).unwrap();
        let pixels = render(
            &mut backend,
            &scene,
            &camera_at(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO),
            &clipping,
        );
        assert!(ids_in(&pixels).is_empty());
    }

    #[test]
    fn test_sparse_sector_is_dithered() {
        let sparse = CadModel::new(
            "a",
            vec![SectorMetadata::new(
                Aabb::new(Vec3::splat(-5.0), Vec3::splat(5.0)),
                CoverageFactors::uniform(0.5),
            )],
            Mat4::IDENTITY,
        );
        let (scene, mut backend) = scene_with(&[sparse]);
        let pixels = render(
            &mut backend,
            &scene,
            &camera_at(Vec3::ZERO, Vec3::new(0.0, 0.0, -1.0)),
            &ClippingState::none(),
        );
        let hits = pixels.chunks_exact(4).filter(|p| *p != BACKGROUND).count();
        assert_eq!(hits, 32 * 32 / 2);
    }

    #[test]
    fn test_transform_moves_group() {
        let mut model = cube_model("a", Vec3::ZERO, 1.0);
        model.transform = Mat4::from_translation(Vec3::new(0.0, 0.0, 30.0));
        let (scene, mut backend) = scene_with(&[model]);
        let pixels = render(
            &mut backend,
            &scene,
            &camera_at(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO),
            &ClippingState::none(),
        );
        assert!(ids_in(&pixels).is_empty());
    }

    #[test]
    fn test_debug_surface_lifecycle() {
        let (scene, mut backend) = scene_with(&[cube_model("a", Vec3::ZERO, 1.0)]);
        assert_eq!(backend.live_resources(), 3);
        backend.create_debug_surface(8, 8).unwrap();
        assert!(matches!(
            backend.create_debug_surface(8, 8),
            Err(VisibilityError::DebugSurfaceExists)
        ));
        let camera = camera_at(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO);
        backend
            .render_debug(&CoverageView::from_camera(&camera), &scene, &ClippingState::none())
            .unwrap();
        let mut debug = Vec::new();
        assert_eq!(backend.read_debug_pixels(&mut debug).unwrap(), (8, 8));
        assert_eq!(debug.len(), 8 * 8 * 4);
        assert_eq!(backend.live_resources(), 5);

        backend.release();
        assert_eq!(backend.live_resources(), 0);
        assert!(matches!(
            backend.render(&CoverageView::from_camera(&camera), &scene, &ClippingState::none()),
            Err(VisibilityError::Released)
        ));
    }

    #[test]
    fn test_short_destination_rejected() {
        let (_, mut backend) = scene_with(&[]);
        let mut small = vec![0; 16];
        assert!(matches!(
            backend.read_pixels(&mut small),
            Err(VisibilityError::Readback(ReadbackError::DestinationTooSmall { .. }))
        ));
    }

    #[test]
    fn test_zero_size_rejected() {
        assert!(matches!(
            SoftwareCoverageBackend::new(0, 4),
            Err(VisibilityError::ResourceExhausted { .. })
        ));
    }
}
