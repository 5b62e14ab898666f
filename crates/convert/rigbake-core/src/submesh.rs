//! Split meshes into per-material submeshes and attach bone weights.
//!
//! - Faces are grouped by material in first-appearance order.
//! - Each group gets its own compact vertex buffer with only the vertices it uses.
//! - Skinned meshes stay in mesh space; static meshes have the owning node's
//!   world transform baked into positions and normals.
//! - Each vertex keeps at most [`MAX_INFLUENCES`] weights, renormalized to sum to 1.

use glam::{Mat3, Mat4, Vec2, Vec3};
use indexmap::IndexMap;
use serde::Serialize;

use crate::diagnostics::{Diagnostics, Warning};
use crate::ids::BoneId;
use crate::scene::{Face, Material, Mesh};
use crate::skeleton::Skeleton;

pub const MAX_INFLUENCES: usize = 4;

const UNUSED: u32 = u32::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Option<Vec2>,
    pub bone_indices: [u32; MAX_INFLUENCES],
    /// Zero for unused slots; non-zero entries sum to 1 on skinned vertices.
    pub bone_weights: [f32; MAX_INFLUENCES],
}

impl Vertex {
    pub fn influence_count(&self) -> usize {
        self.bone_weights.iter().filter(|&&w| w > 0.0).count()
    }
}

/// Axis-aligned bounding box. Starts inverted so the first point defines it.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::INFINITY),
            max: Vec3::splat(f32::NEG_INFINITY),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }

    pub fn extend(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    pub fn contains(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MaterialRef {
    pub index: usize,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Submesh {
    /// `<mesh>/<material>`
    pub name: String,
    /// Index of the source mesh in the scene.
    pub mesh: usize,
    pub material: MaterialRef,
    pub skinned: bool,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub bounds: Aabb,
}

impl Submesh {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// How skin bindings resolve against the built skeleton.
#[derive(Clone, Copy, Debug)]
pub struct SkinContext<'a> {
    pub skeleton: &'a Skeleton,
    /// Bone used for vertices without any influence; normally the nearest
    /// bone above the mesh's node.
    pub fallback: Option<BoneId>,
}

type Influences = ([u32; MAX_INFLUENCES], [f32; MAX_INFLUENCES]);

/// Partition one mesh instance. `node_world` is the world transform of the
/// node the mesh hangs off; it is only applied to static meshes.
pub fn partition(
    mesh_index: usize,
    mesh: &Mesh,
    materials: &[Material],
    node_world: Mat4,
    skin: SkinContext<'_>,
    diag: &mut Diagnostics,
) -> Vec<Submesh> {
    let skinned = mesh.is_skinned() && !skin.skeleton.is_empty();
    let influences = if skinned {
        Some(resolve_mesh_influences(mesh, skin, diag))
    } else {
        None
    };
    let bake = if skinned { None } else { Some(Baker::new(node_world)) };

    let mut groups: IndexMap<usize, Vec<&Face>> = IndexMap::new();
    for face in &mesh.faces {
        groups.entry(mesh.face_material(face)).or_default().push(face);
    }

    let mut out = Vec::with_capacity(groups.len());
    for (material, faces) in groups {
        let mut remap = vec![UNUSED; mesh.positions.len()];
        let mut vertices = Vec::new();
        let mut indices = Vec::with_capacity(faces.len() * 3);
        let mut bounds = Aabb::empty();

        for face in faces {
            for &v in &face.indices {
                let slot = &mut remap[v as usize];
                if *slot == UNUSED {
                    *slot = vertices.len() as u32;
                    let vertex = build_vertex(mesh, v as usize, bake.as_ref(), influences.as_deref());
                    bounds.extend(vertex.position);
                    vertices.push(vertex);
                }
                indices.push(*slot);
            }
        }

        let material_name = materials
            .get(material)
            .map(|m| m.name.clone())
            .unwrap_or_default();
        out.push(Submesh {
            name: format!("{}/{}", mesh.name, material_name),
            mesh: mesh_index,
            material: MaterialRef {
                index: material,
                name: material_name,
            },
            skinned,
            vertices,
            indices,
            bounds,
        });
    }
    out
}

struct Baker {
    transform: Mat4,
    normal: Mat3,
}

impl Baker {
    fn new(transform: Mat4) -> Self {
        let linear = Mat3::from_mat4(transform);
        let normal = if linear.determinant().abs() > f32::EPSILON {
            linear.inverse().transpose()
        } else {
            linear
        };
        Self { transform, normal }
    }
}

fn build_vertex(
    mesh: &Mesh,
    v: usize,
    bake: Option<&Baker>,
    influences: Option<&[Influences]>,
) -> Vertex {
    let mut position = mesh.positions[v];
    let mut normal = mesh.normals.get(v).copied().unwrap_or(Vec3::ZERO);
    if let Some(b) = bake {
        position = b.transform.transform_point3(position);
        normal = (b.normal * normal).normalize_or_zero();
    }
    let (bone_indices, bone_weights) = influences
        .map(|all| all[v])
        .unwrap_or(([0; MAX_INFLUENCES], [0.0; MAX_INFLUENCES]));
    Vertex {
        position,
        normal,
        uv: mesh.uvs.as_ref().map(|uvs| uvs[v]),
        bone_indices,
        bone_weights,
    }
}

fn resolve_mesh_influences(
    mesh: &Mesh,
    skin: SkinContext<'_>,
    diag: &mut Diagnostics,
) -> Vec<Influences> {
    let mut raw: Vec<Vec<(BoneId, f32)>> = vec![Vec::new(); mesh.positions.len()];
    for binding in &mesh.bones {
        let Some(bone) = skin.skeleton.bone_index(&binding.name) else {
            continue;
        };
        // Repeated bindings of one bone add up in a single slot.
        for w in binding.weights.iter().filter(|w| w.weight > 0.0) {
            let list = &mut raw[w.vertex as usize];
            match list.iter_mut().find(|(b, _)| *b == bone) {
                Some(entry) => entry.1 += w.weight,
                None => list.push((bone, w.weight)),
            }
        }
    }

    let fallback = skin.fallback.unwrap_or(BoneId(0));
    let mut over = 0usize;
    let mut max_influences = 0usize;
    let mut unweighted = 0usize;
    let resolved = raw
        .into_iter()
        .map(|list| {
            if list.is_empty() {
                unweighted += 1;
                let mut indices = [0; MAX_INFLUENCES];
                let mut weights = [0.0; MAX_INFLUENCES];
                indices[0] = fallback.0;
                weights[0] = 1.0;
                return (indices, weights);
            }
            if list.len() > MAX_INFLUENCES {
                over += 1;
                max_influences = max_influences.max(list.len());
            }
            limit_influences(list)
        })
        .collect();

    if over > 0 {
        diag.push(Warning::OverInfluencedVertex {
            mesh: mesh.name.clone(),
            vertices: over,
            max_influences,
        });
    }
    if unweighted > 0 {
        diag.push(Warning::UnweightedVertex {
            mesh: mesh.name.clone(),
            vertices: unweighted,
        });
    }
    resolved
}

/// Keep the largest [`MAX_INFLUENCES`] weights and renormalize them.
/// The sort is stable, so equal weights at the cut keep binding order.
pub fn limit_influences(mut list: Vec<(BoneId, f32)>) -> Influences {
    list.sort_by(|a, b| b.1.total_cmp(&a.1));
    list.truncate(MAX_INFLUENCES);
    let sum: f32 = list.iter().map(|(_, w)| w).sum();

    let mut indices = [0; MAX_INFLUENCES];
    let mut weights = [0.0; MAX_INFLUENCES];
    for (slot, (bone, w)) in list.into_iter().enumerate() {
        indices[slot] = bone.0;
        weights[slot] = if sum > 0.0 { w / sum } else { 0.0 };
    }
    (indices, weights)
}
