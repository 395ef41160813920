//! CAD model and sector metadata as handed to the prioritizer.

use std::fmt;
use std::sync::Arc;

use glam::Mat4;
use sectorview_render::Aabb;

use crate::coverage::CoverageFactors;
use crate::error::VisibilityError;

/// Identity of a model across `set_models` calls.
///
/// Two models with equal keys are the same model; a changed transform on the
/// same key is an update, not a re-registration.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelKey(Arc<str>);

impl ModelKey {
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ModelKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for ModelKey {
    fn from(key: String) -> Self {
        Self::new(key)
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One sector of a model: its model-space bounds and how densely the box is
/// actually filled when seen along each axis plane.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SectorMetadata {
    pub bounds: Aabb,
    pub coverage: CoverageFactors,
}

impl SectorMetadata {
    pub fn new(bounds: Aabb, coverage: CoverageFactors) -> Self {
        Self { bounds, coverage }
    }

    /// A sector whose box is completely filled.
    pub fn solid(bounds: Aabb) -> Self {
        Self::new(bounds, CoverageFactors::FULL)
    }
}

/// Node of the hierarchical sector tree a model is delivered as.
#[derive(Clone, Debug)]
pub struct SectorNode {
    /// Local sector id, unique inside the model.
    pub id: u32,
    pub metadata: SectorMetadata,
    pub children: Vec<SectorNode>,
}

impl SectorNode {
    pub fn leaf(id: u32, metadata: SectorMetadata) -> Self {
        Self {
            id,
            metadata,
            children: Vec::new(),
        }
    }

    pub fn with_children(id: u32, metadata: SectorMetadata, children: Vec<SectorNode>) -> Self {
        Self {
            id,
            metadata,
            children,
        }
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(SectorNode::count).sum::<usize>()
    }
}

/// Flatten a sector tree into `(local id, metadata)` pairs ordered by id.
///
/// Nodes are collected depth-first and then stably sorted, so duplicated ids
/// end up adjacent.
pub fn flatten_sectors(root: &SectorNode) -> Vec<(u32, SectorMetadata)> {
    let mut nodes = Vec::with_capacity(root.count());
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        nodes.push((node.id, node.metadata));
        // Reverse so the leftmost child is visited first.
        stack.extend(node.children.iter().rev());
    }
    nodes.sort_by_key(|(id, _)| *id);
    nodes
}

/// A CAD model registered for prioritization.
///
/// The sector list is shared, so cloning a model for every `set_models` call
/// does not copy sector data.
#[derive(Clone, Debug)]
pub struct CadModel {
    pub key: ModelKey,
    pub sectors: Arc<[SectorMetadata]>,
    /// Local id of each entry in `sectors`. `None` when the position is the id.
    pub sector_ids: Option<Arc<[u32]>>,
    /// Model → world transform.
    pub transform: Mat4,
}

impl CadModel {
    pub fn new(key: impl Into<ModelKey>, sectors: Vec<SectorMetadata>, transform: Mat4) -> Self {
        Self {
            key: key.into(),
            sectors: sectors.into(),
            sector_ids: None,
            transform,
        }
    }

    /// Build a model from a sector tree, keeping the node ids as local ids.
    ///
    /// Node ids need not be contiguous but must be unique.
    pub fn from_tree(
        key: impl Into<ModelKey>,
        root: &SectorNode,
        transform: Mat4,
    ) -> Result<Self, VisibilityError> {
        let key = key.into();
        let flat = flatten_sectors(root);
        if let Some(pair) = flat.windows(2).find(|pair| pair[0].0 == pair[1].0) {
            return Err(VisibilityError::DuplicateSectorId {
                model: key,
                sector_id: pair[0].0,
            });
        }

        let dense = flat.iter().zip(0u32..).all(|((id, _), position)| *id == position);
        let (ids, sectors): (Vec<u32>, Vec<SectorMetadata>) = flat.into_iter().unzip();
        let mut model = Self::new(key, sectors, transform);
        if !dense {
            model.sector_ids = Some(ids.into());
        }
        Ok(model)
    }

    /// Local id of the sector stored at `position`.
    pub fn local_id(&self, position: usize) -> u32 {
        match &self.sector_ids {
            Some(ids) => ids.get(position).copied().unwrap_or(u32::MAX),
            None => u32::try_from(position).unwrap_or(u32::MAX),
        }
    }

    /// Same model and sectors under a different transform.
    pub fn with_transform(&self, transform: Mat4) -> Self {
        Self {
            key: self.key.clone(),
            sectors: Arc::clone(&self.sectors),
            sector_ids: self.sector_ids.clone(),
            transform,
        }
    }

    pub fn sector_count(&self) -> u32 {
        u32::try_from(self.sectors.len()).unwrap_or(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn unit_sector(offset: f32) -> SectorMetadata {
        SectorMetadata::solid(Aabb::new(
            Vec3::splat(offset),
            Vec3::splat(offset + 1.0),
        ))
    }

    #[test]
    fn test_model_key_equality_by_content() {
        let a = ModelKey::from("pump");
        let b = ModelKey::from(String::from("pump"));
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "pump");
        assert_eq!(a.to_string(), "pump");
    }

    #[test]
    fn test_flatten_orders_by_id() {
        let root = SectorNode::with_children(
            0,
            unit_sector(0.0),
            vec![
                SectorNode::with_children(
                    1,
                    unit_sector(1.0),
                    vec![SectorNode::leaf(3, unit_sector(3.0))],
                ),
                SectorNode::leaf(2, unit_sector(2.0)),
            ],
        );
        let flat = flatten_sectors(&root);
        assert_eq!(flat.len(), 4);
        for (position, (id, sector)) in flat.iter().enumerate() {
            assert_eq!(*id, position as u32);
            assert_eq!(sector.bounds.min, Vec3::splat(position as f32));
        }
    }

    #[test]
    fn test_flatten_single_leaf() {
        let flat = flatten_sectors(&SectorNode::leaf(0, unit_sector(5.0)));
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].1.bounds.min, Vec3::splat(5.0));
    }

    #[test]
    fn test_from_tree_dense_ids_need_no_table() {
        let root = SectorNode::with_children(
            0,
            unit_sector(0.0),
            vec![SectorNode::leaf(1, unit_sector(1.0))],
        );
        let model = CadModel::from_tree("m", &root, Mat4::IDENTITY).unwrap();
        assert!(model.sector_ids.is_none());
        assert_eq!(model.local_id(1), 1);
    }

    #[test]
    fn test_from_tree_keeps_sparse_ids() {
        let root = SectorNode::with_children(
            20,
            unit_sector(20.0),
            vec![
                SectorNode::leaf(0, unit_sector(0.0)),
                SectorNode::leaf(10, unit_sector(10.0)),
            ],
        );
        let model = CadModel::from_tree("m", &root, Mat4::IDENTITY).unwrap();
        assert_eq!(model.sector_count(), 3);
        assert_eq!(model.sector_ids.as_deref(), Some(&[0, 10, 20][..]));
        assert_eq!(model.local_id(2), 20);
        assert_eq!(model.sectors[2].bounds.min, Vec3::splat(20.0));

        let moved = model.with_transform(Mat4::from_translation(Vec3::X));
        assert_eq!(moved.local_id(1), 10);
    }

    #[test]
    fn test_from_tree_rejects_duplicate_ids() {
        let root = SectorNode::with_children(
            0,
            unit_sector(0.0),
            vec![
                SectorNode::leaf(4, unit_sector(1.0)),
                SectorNode::leaf(4, unit_sector(2.0)),
            ],
        );
        let err = CadModel::from_tree("m", &root, Mat4::IDENTITY).unwrap_err();
        assert!(matches!(
            err,
            VisibilityError::DuplicateSectorId { sector_id: 4, .. }
        ));
        assert!(err.is_programmer_error());
    }

    #[test]
    fn test_tree_count() {
        let root = SectorNode::with_children(
            0,
            unit_sector(0.0),
            vec![
                SectorNode::leaf(1, unit_sector(0.0)),
                SectorNode::leaf(2, unit_sector(0.0)),
            ],
        );
        assert_eq!(root.count(), 3);
    }

    #[test]
    fn test_with_transform_shares_sectors() {
        let model = CadModel::new("m", vec![unit_sector(0.0)], Mat4::IDENTITY);
        let moved = model.with_transform(Mat4::from_translation(Vec3::X));
        assert!(Arc::ptr_eq(&model.sectors, &moved.sectors));
        assert_eq!(moved.key, model.key);
        assert_eq!(moved.sector_count(), 1);
    }
}
