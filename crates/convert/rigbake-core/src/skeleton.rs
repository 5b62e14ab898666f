//! Bone hierarchy construction.
//!
//! Bones are discovered by a depth-first walk from the scene root over the
//! needed nodes only. Indices are handed out in discovery order, so a parent
//! always has a smaller index than its children, and the index is what vertex
//! bone references store.

use glam::{Mat4, Quat, Vec3};
use hashbrown::HashMap;
use serde::Serialize;

use crate::error::{ConvertError, Result};
use crate::ids::{BoneId, BoneIdAllocator, NodeId};
use crate::needed::NeededSet;
use crate::scene::Scene;
use crate::track::SkeletonAnimation;
use crate::transform::NodeTransforms;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Bone {
    pub id: BoneId,
    pub name: String,
    /// Scene node the bone was built from.
    pub node: NodeId,
    pub parent: Option<BoneId>,
    /// Bind transform relative to the parent bone.
    pub local: Mat4,
    /// Bind transform in model space.
    pub world: Mat4,
    /// Inverse bind matrix from the first skin binding naming this bone.
    pub offset: Option<Mat4>,
}

impl Bone {
    /// Local bind pose as (translation, rotation, scale).
    pub fn local_trs(&self) -> (Vec3, Quat, Vec3) {
        let (scale, rotation, translation) = self.local.to_scale_rotation_translation();
        (translation, rotation, scale)
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct Skeleton {
    bones: Vec<Bone>,
    pub animations: Vec<SkeletonAnimation>,
    #[serde(skip)]
    by_name: HashMap<String, BoneId>,
    #[serde(skip)]
    by_node: HashMap<NodeId, BoneId>,
}

impl Skeleton {
    pub fn bones(&self) -> &[Bone] {
        &self.bones
    }

    pub fn bone(&self, id: BoneId) -> &Bone {
        &self.bones[id.index()]
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    pub fn root(&self) -> Option<&Bone> {
        self.bones.first()
    }

    pub fn bone_index(&self, name: &str) -> Option<BoneId> {
        self.by_name.get(name).copied()
    }

    pub fn bone_for_node(&self, node: NodeId) -> Option<BoneId> {
        self.by_node.get(&node).copied()
    }

    pub fn children(&self, id: BoneId) -> impl Iterator<Item = BoneId> + '_ {
        self.bones
            .iter()
            .filter(move |b| b.parent == Some(id))
            .map(|b| b.id)
    }

    /// First bone found walking up from `node`, the node itself included.
    pub fn nearest_bone(&self, scene: &Scene, node: NodeId) -> Option<BoneId> {
        std::iter::once(node)
            .chain(scene.ancestors(node))
            .find_map(|n| self.bone_for_node(n))
    }
}

/// Build the skeleton for `needed`, taking bind transforms from `transforms`.
pub fn build_skeleton(
    scene: &Scene,
    needed: &NeededSet,
    transforms: &NodeTransforms,
) -> Result<Skeleton> {
    let mut alloc = BoneIdAllocator::new();
    let mut skeleton = Skeleton::default();

    // Every needed node has a needed parent, so pruning at the first
    // unneeded node never hides a bone.
    let mut stack: Vec<(NodeId, Option<BoneId>)> = vec![(scene.root(), None)];
    while let Some((id, parent)) = stack.pop() {
        if !needed.contains(id) {
            continue;
        }
        let node = scene.node(id);
        if skeleton.by_name.contains_key(&node.name) {
            return Err(ConvertError::NameCollision {
                name: node.name.clone(),
            });
        }
        let bone_id = alloc.alloc();
        skeleton.bones.push(Bone {
            id: bone_id,
            name: node.name.clone(),
            node: id,
            parent,
            local: transforms.local(id),
            world: transforms.world(id),
            offset: None,
        });
        skeleton.by_name.insert(node.name.clone(), bone_id);
        skeleton.by_node.insert(id, bone_id);

        stack.extend(node.children.iter().rev().map(|&c| (c, Some(bone_id))));
    }

    for (_, binding) in scene.skin_bones() {
        if let Some(id) = skeleton.bone_index(&binding.name) {
            let bone = &mut skeleton.bones[id.index()];
            if bone.offset.is_none() {
                bone.offset = binding.offset;
            }
        }
    }

    log::debug!("skeleton: {} bones", alloc.count());
    Ok(skeleton)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::needed::mark_needed;
    use crate::scene::{Face, Mesh, MeshBone, SceneBuilder, VertexWeight};
    use crate::transform::TransformResolver;

    fn bound(names: &[&str]) -> Mesh {
        Mesh {
            name: "m".into(),
            positions: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            normals: vec![],
            uvs: None,
            material: 0,
            faces: vec![Face::new([0, 1, 2])],
            bones: names
                .iter()
                .map(|n| MeshBone {
                    name: n.to_string(),
                    offset: Some(Mat4::from_translation(Vec3::Z)),
                    weights: vec![VertexWeight {
                        vertex: 0,
                        weight: 1.0,
                    }],
                })
                .collect(),
        }
    }

    #[test]
    fn siblings_keep_scene_order() {
        let mut b = SceneBuilder::new("root", Mat4::IDENTITY);
        let l = b.add_node(b.root(), "left", Mat4::IDENTITY);
        let r = b.add_node(b.root(), "right", Mat4::IDENTITY);
        b.add_node(l, "left_hand", Mat4::IDENTITY);
        b.add_node(r, "right_hand", Mat4::IDENTITY);
        let m = b.add_mesh(bound(&["left_hand", "right_hand"]));
        b.attach_mesh(b.root(), m);
        let scene = b.build().unwrap();

        let needed = mark_needed(&scene);
        let transforms = TransformResolver::fresh(&scene).resolve_all().unwrap();
        let skel = build_skeleton(&scene, &needed, &transforms).unwrap();
        let names: Vec<_> = skel.bones().iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["root", "left", "left_hand", "right", "right_hand"]);
        assert_eq!(
            skel.children(BoneId(0)).collect::<Vec<_>>(),
            vec![BoneId(1), BoneId(3)]
        );
        assert!(skel.bone(BoneId(2)).offset.is_some());
        assert!(skel.bone(BoneId(1)).offset.is_none());
    }

    #[test]
    fn duplicate_needed_names_collide() {
        let mut b = SceneBuilder::new("root", Mat4::IDENTITY);
        let a = b.add_node(b.root(), "joint", Mat4::IDENTITY);
        b.add_node(a, "joint", Mat4::IDENTITY);
        let m = b.add_mesh(bound(&["joint"]));
        b.attach_mesh(b.root(), m);
        let scene = b.build().unwrap();

        // Descendant marking pulls the nested duplicate in.
        let needed = crate::needed::mark_needed_with(
            &scene,
            crate::needed::NeededOptions {
                include_bone_descendants: true,
            },
            &mut crate::diagnostics::Diagnostics::new(),
        );
        let transforms = TransformResolver::fresh(&scene).resolve_all().unwrap();
        let err = build_skeleton(&scene, &needed, &transforms).unwrap_err();
        assert!(matches!(err, ConvertError::NameCollision { name } if name == "joint"));
    }

    #[test]
    fn empty_needed_set_gives_empty_skeleton() {
        let scene = SceneBuilder::new("root", Mat4::IDENTITY).build().unwrap();
        let needed = mark_needed(&scene);
        let transforms = TransformResolver::fresh(&scene).resolve_all().unwrap();
        let skel = build_skeleton(&scene, &needed, &transforms).unwrap();
        assert!(skel.is_empty());
        assert!(skel.root().is_none());
    }
}
