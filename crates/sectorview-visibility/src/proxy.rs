//! Per-model bounding-box proxy groups and their diff-based maintenance.

use std::collections::{BTreeMap, BTreeSet};

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use sectorview_render::Aabb;

use crate::coverage::CoverageFactors;
use crate::error::VisibilityError;
use crate::id_space::SectorIdSpace;
use crate::model::{CadModel, ModelKey};

/// One sector box as drawn by the coverage pass, in model space.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ProxyInstance {
    pub box_min: [f32; 3],
    pub global_id: u32,
    pub box_max: [f32; 3],
    /// `[xy, xz, yz]` coverage factors.
    pub coverage: [f32; 3],
}

static_assertions::assert_eq_size!(ProxyInstance, [u8; 40]);

impl ProxyInstance {
    const ATTRIBUTES: [wgpu::VertexAttribute; 4] = wgpu::vertex_attr_array![
        1 => Float32x3,
        2 => Uint32,
        3 => Float32x3,
        4 => Float32x3
    ];

    pub fn new(global_id: u32, bounds: &Aabb, coverage: CoverageFactors) -> Self {
        Self {
            box_min: bounds.min.to_array(),
            global_id,
            box_max: bounds.max.to_array(),
            coverage: coverage.to_array(),
        }
    }

    /// Per-instance buffer layout, vertex slot 1.
    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<ProxyInstance>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &Self::ATTRIBUTES,
        }
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::new(Vec3::from(self.box_min), Vec3::from(self.box_max))
    }

    pub fn coverage_factors(&self) -> CoverageFactors {
        let [xy, xz, yz] = self.coverage;
        CoverageFactors { xy, xz, yz }
    }
}

/// All proxies of one model, sharing the model's transform.
#[derive(Clone, Debug)]
pub struct ProxyGroup {
    pub key: ModelKey,
    pub id_offset: u32,
    pub transform: Mat4,
    pub instances: Vec<ProxyInstance>,
}

impl ProxyGroup {
    fn build(model: &CadModel, id_offset: u32) -> Self {
        let instances = model
            .sectors
            .iter()
            .zip(id_offset..)
            .map(|(sector, global_id)| ProxyInstance::new(global_id, &sector.bounds, sector.coverage))
            .collect();
        Self {
            key: model.key.clone(),
            id_offset,
            transform: model.transform,
            instances,
        }
    }

    pub fn instance_count(&self) -> u32 {
        self.instances.len() as u32
    }
}

/// Model keys touched by one `set_models` call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SceneDiff {
    pub added: Vec<ModelKey>,
    pub updated: Vec<ModelKey>,
    pub removed: Vec<ModelKey>,
}

impl SceneDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Proxy scene keyed by model identity.
///
/// Groups are iterated in key order so renders are reproducible.
#[derive(Debug, Default)]
pub struct CoverageProxyBuilder {
    groups: BTreeMap<ModelKey, ProxyGroup>,
}

impl CoverageProxyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the scene with `models`.
    ///
    /// New keys get fresh id ranges and proxy groups, vanished keys are
    /// dropped and their ranges retired, and surviving keys pick up a changed
    /// transform in place. Sector lists of surviving keys are not rebuilt. If
    /// a key appears more than once, the last entry wins.
    ///
    /// Nothing changes if the new sectors do not fit the id space or one of
    /// them has non-finite or inverted bounds.
    pub fn set_models(
        &mut self,
        models: &[CadModel],
        ids: &mut SectorIdSpace,
    ) -> Result<SceneDiff, VisibilityError> {
        let incoming: BTreeMap<&ModelKey, &CadModel> =
            models.iter().map(|model| (&model.key, model)).collect();
        let existing: BTreeSet<ModelKey> = self.groups.keys().cloned().collect();
        let incoming_keys: BTreeSet<ModelKey> = incoming.keys().map(|k| (*k).clone()).collect();

        let removed: Vec<ModelKey> = existing.difference(&incoming_keys).cloned().collect();
        let added: Vec<ModelKey> = incoming_keys.difference(&existing).cloned().collect();

        let new_ids: u64 = added
            .iter()
            .filter_map(|k| incoming.get(k))
            .map(|m| u64::from(m.sector_count()))
            .sum();
        ids.check_capacity(new_ids)?;
        for model in added.iter().filter_map(|k| incoming.get(k)) {
            validate_bounds(model)?;
        }

        let mut updated = Vec::new();
        for key in incoming_keys.intersection(&existing) {
            let (Some(group), Some(model)) = (self.groups.get_mut(key), incoming.get(key)) else {
                continue;
            };
            if group.transform != model.transform {
                group.transform = model.transform;
                updated.push(key.clone());
            }
        }

        for key in &removed {
            self.groups.remove(key);
            ids.retire_model(key);
        }

        for key in &added {
            let Some(model) = incoming.get(key) else {
                continue;
            };
            let offset = ids.register_model_with_ids(
                key.clone(),
                model.sector_count(),
                model.sector_ids.clone(),
            )?;
            self.groups.insert(key.clone(), ProxyGroup::build(model, offset));
        }

        if !added.is_empty() || !removed.is_empty() {
            log::info!(
                "Proxy scene: +{} -{} ~{} models, {} sectors",
                added.len(),
                removed.len(),
                updated.len(),
                self.instance_count()
            );
        }

        Ok(SceneDiff {
            added,
            updated,
            removed,
        })
    }

    pub fn groups(&self) -> impl Iterator<Item = &ProxyGroup> {
        self.groups.values()
    }

    pub fn group(&self, key: &ModelKey) -> Option<&ProxyGroup> {
        self.groups.get(key)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Sector proxies across all groups.
    pub fn instance_count(&self) -> usize {
        self.groups.values().map(|g| g.instances.len()).sum()
    }

    /// Drop every group, retiring their ranges.
    pub fn clear(&mut self, ids: &mut SectorIdSpace) {
        for key in self.groups.keys() {
            ids.retire_model(key);
        }
        self.groups.clear();
    }
}

fn validate_bounds(model: &CadModel) -> Result<(), VisibilityError> {
    match model.sectors.iter().position(|s| !s.bounds.is_valid()) {
        Some(position) => Err(VisibilityError::InvalidSectorBounds {
            model: model.key.clone(),
            sector_id: model.local_id(position),
        }),
        None => Ok(()),
    }
}
