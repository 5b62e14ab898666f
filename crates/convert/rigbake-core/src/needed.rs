//! Which scene nodes have to become bones.
//!
//! A node is needed when a skin binding names it, or when it is an ancestor of
//! such a node: a bone's bind position depends on its whole ancestor chain even
//! if those ancestors carry no weight. The result is computed once and never
//! revised.

use crate::diagnostics::{Diagnostics, Warning};
use crate::ids::NodeId;
use crate::scene::Scene;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NeededOptions {
    /// Also mark every descendant of a skinned node.
    pub include_bone_descendants: bool,
}

/// Immutable membership set over a scene's nodes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NeededSet {
    flags: Vec<bool>,
    count: usize,
}

impl NeededSet {
    #[inline]
    pub fn contains(&self, id: NodeId) -> bool {
        self.flags.get(id.index()).copied().unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Needed nodes in arena order.
    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.flags
            .iter()
            .enumerate()
            .filter(|(_, &f)| f)
            .map(|(i, _)| NodeId(i as u32))
    }

    pub fn is_subset(&self, other: &NeededSet) -> bool {
        self.iter().all(|id| other.contains(id))
    }
}

pub fn mark_needed(scene: &Scene) -> NeededSet {
    mark_needed_with(scene, NeededOptions::default(), &mut Diagnostics::new())
}

/// Worklist traversal: seeds are the nodes named by skin bindings; each newly
/// marked node pushes its parent (and, optionally, its children).
pub fn mark_needed_with(scene: &Scene, opts: NeededOptions, diag: &mut Diagnostics) -> NeededSet {
    let mut flags = vec![false; scene.len()];
    let mut work: Vec<NodeId> = Vec::new();

    for (mesh_index, bone) in scene.skin_bones() {
        match scene.find(&bone.name) {
            Some(id) => work.push(id),
            None => diag.push(Warning::UnknownSkinBone {
                mesh: scene.meshes[mesh_index].name.clone(),
                bone: bone.name.clone(),
            }),
        }
    }

    if opts.include_bone_descendants {
        let mut down = work.clone();
        while let Some(id) = down.pop() {
            for &child in &scene.node(id).children {
                work.push(child);
                down.push(child);
            }
        }
    }

    let mut count = 0;
    while let Some(id) = work.pop() {
        if flags[id.index()] {
            continue;
        }
        flags[id.index()] = true;
        count += 1;
        if let Some(parent) = scene.parent(id) {
            work.push(parent);
        }
    }

    log::debug!("needed nodes: {count} of {}", scene.len());
    NeededSet { flags, count }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Face, Mesh, MeshBone, SceneBuilder, VertexWeight};
    use glam::{Mat4, Vec3};

    fn skin_mesh(bones: &[&str]) -> Mesh {
        Mesh {
            name: "body".into(),
            positions: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            normals: vec![],
            uvs: None,
            material: 0,
            faces: vec![Face::new([0, 1, 2])],
            bones: bones
                .iter()
                .map(|b| MeshBone {
                    name: b.to_string(),
                    offset: None,
                    weights: vec![VertexWeight {
                        vertex: 0,
                        weight: 1.0,
                    }],
                })
                .collect(),
        }
    }

    #[test]
    fn descendants_are_optional() {
        let mut b = SceneBuilder::new("root", Mat4::IDENTITY);
        let arm = b.add_node(b.root(), "arm", Mat4::IDENTITY);
        let tip = b.add_node(arm, "tip", Mat4::IDENTITY);
        let m = b.add_mesh(skin_mesh(&["arm"]));
        b.attach_mesh(b.root(), m);
        let scene = b.build().unwrap();

        let plain = mark_needed(&scene);
        assert!(plain.contains(arm));
        assert!(!plain.contains(tip));

        let with = mark_needed_with(
            &scene,
            NeededOptions {
                include_bone_descendants: true,
            },
            &mut Diagnostics::new(),
        );
        assert!(with.contains(tip));
        assert!(plain.is_subset(&with));
    }

    #[test]
    fn unknown_bone_is_a_warning() {
        let mut b = SceneBuilder::new("root", Mat4::IDENTITY);
        b.add_mesh(skin_mesh(&["ghost"]));
        let scene = b.build().unwrap();
        let mut diag = Diagnostics::new();
        let needed = mark_needed_with(&scene, NeededOptions::default(), &mut diag);
        assert!(needed.is_empty());
        assert_eq!(diag.len(), 1);
    }
}
