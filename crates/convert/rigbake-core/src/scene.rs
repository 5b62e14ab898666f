//! Input scene model, as handed over by an importer.
//!
//! The node tree is stored as an arena: nodes live in a `Vec` addressed by
//! [`NodeId`], children are id lists and parent links are derived once when the
//! scene is built. The root is always `NodeId(0)`. Meshes, materials and
//! animations are flat lists referenced by index.
//!
//! Nothing in the conversion pipeline mutates a [`Scene`].

use glam::{Mat4, Quat, Vec2, Vec3};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::error::ImportError;
use crate::ids::NodeId;

/// Name given to the implicit material when a scene declares none.
pub const DEFAULT_MATERIAL: &str = "default";

#[derive(Clone, Debug, PartialEq)]
pub struct SceneNode {
    /// Unique within a well-formed scene; doubles as bone identity.
    pub name: String,
    /// Transform relative to the parent node.
    pub transform: Mat4,
    pub children: Vec<NodeId>,
    /// Indices into [`Scene::meshes`].
    pub meshes: Vec<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct VertexWeight {
    pub vertex: u32,
    pub weight: f32,
}

/// One skin binding of a mesh: the node it follows and the vertices it moves.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeshBone {
    pub name: String,
    /// Mesh space to bone space at bind time.
    #[serde(default)]
    pub offset: Option<Mat4>,
    #[serde(default)]
    pub weights: Vec<VertexWeight>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Face {
    pub indices: [u32; 3],
    /// Per-face material; falls back to [`Mesh::material`].
    #[serde(default)]
    pub material: Option<usize>,
}

impl Face {
    pub fn new(indices: [u32; 3]) -> Self {
        Self {
            indices,
            material: None,
        }
    }

    pub fn with_material(indices: [u32; 3], material: usize) -> Self {
        Self {
            indices,
            material: Some(material),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    pub name: String,
    pub positions: Vec<Vec3>,
    /// Empty, or one normal per position.
    #[serde(default)]
    pub normals: Vec<Vec3>,
    #[serde(default)]
    pub uvs: Option<Vec<Vec2>>,
    /// Default material for faces without their own.
    #[serde(default)]
    pub material: usize,
    pub faces: Vec<Face>,
    #[serde(default)]
    pub bones: Vec<MeshBone>,
}

impl Mesh {
    pub fn is_skinned(&self) -> bool {
        !self.bones.is_empty()
    }

    #[inline]
    pub fn face_material(&self, face: &Face) -> usize {
        face.material.unwrap_or(self.material)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct VectorKey {
    /// Time in ticks.
    pub time: f64,
    pub value: Vec3,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuatKey {
    /// Time in ticks.
    pub time: f64,
    pub value: Quat,
}

/// Keyframes for one node within an animation. The three key lists are
/// sampled independently and may have different times.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeChannel {
    pub node: String,
    #[serde(default)]
    pub position_keys: Vec<VectorKey>,
    #[serde(default)]
    pub rotation_keys: Vec<QuatKey>,
    #[serde(default)]
    pub scaling_keys: Vec<VectorKey>,
}

impl NodeChannel {
    pub fn is_empty(&self) -> bool {
        self.position_keys.is_empty() && self.rotation_keys.is_empty() && self.scaling_keys.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Animation {
    #[serde(default)]
    pub name: String,
    /// 0 when the source format does not say.
    #[serde(default)]
    pub ticks_per_second: f64,
    /// Duration in ticks.
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub channels: Vec<NodeChannel>,
}

impl Animation {
    pub fn channel(&self, node: &str) -> Option<&NodeChannel> {
        self.channels.iter().find(|c| c.node == node)
    }
}

/// Read-only scene graph produced by an importer.
#[derive(Clone, Debug)]
pub struct Scene {
    nodes: Vec<SceneNode>,
    parents: Vec<Option<NodeId>>,
    by_name: HashMap<String, NodeId>,
    pub meshes: Vec<Mesh>,
    pub materials: Vec<Material>,
    pub animations: Vec<Animation>,
}

impl Scene {
    #[inline]
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &SceneNode {
        &self.nodes[id.index()]
    }

    #[inline]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.parents[id.index()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: a scene has at least its root.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    /// First node carrying `name`, in arena order.
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.by_name.get(name).copied()
    }

    /// Strict ancestors of `id`, nearest first.
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            scene: self,
            next: self.parent(id),
        }
    }

    /// `(node, mesh index)` pairs in arena order.
    pub fn mesh_instances(&self) -> Vec<(NodeId, usize)> {
        self.node_ids()
            .flat_map(|id| self.node(id).meshes.iter().map(move |&m| (id, m)))
            .collect()
    }

    /// Flat list of skin bindings across all meshes, in mesh order.
    pub fn skin_bones(&self) -> impl Iterator<Item = (usize, &MeshBone)> + '_ {
        self.meshes
            .iter()
            .enumerate()
            .flat_map(|(i, m)| m.bones.iter().map(move |b| (i, b)))
    }
}

pub struct Ancestors<'a> {
    scene: &'a Scene,
    next: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.scene.parent(current);
        Some(current)
    }
}

/// Incremental scene construction. Nodes can only be added under an existing
/// parent, so the result is always a tree.
#[derive(Debug)]
pub struct SceneBuilder {
    nodes: Vec<SceneNode>,
    parents: Vec<Option<NodeId>>,
    meshes: Vec<Mesh>,
    materials: Vec<Material>,
    animations: Vec<Animation>,
}

impl SceneBuilder {
    pub fn new(root_name: impl Into<String>, root_transform: Mat4) -> Self {
        Self {
            nodes: vec![SceneNode {
                name: root_name.into(),
                transform: root_transform,
                children: Vec::new(),
                meshes: Vec::new(),
            }],
            parents: vec![None],
            meshes: Vec::new(),
            materials: Vec::new(),
            animations: Vec::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Append a child under `parent`. Panics if `parent` was not produced by this builder.
    pub fn add_node(&mut self, parent: NodeId, name: impl Into<String>, transform: Mat4) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(SceneNode {
            name: name.into(),
            transform,
            children: Vec::new(),
            meshes: Vec::new(),
        });
        self.parents.push(Some(parent));
        self.nodes[parent.index()].children.push(id);
        id
    }

    pub fn add_mesh(&mut self, mesh: Mesh) -> usize {
        self.meshes.push(mesh);
        self.meshes.len() - 1
    }

    /// Attach an already added mesh to a node (meshes may be instanced).
    pub fn attach_mesh(&mut self, node: NodeId, mesh: usize) {
        self.nodes[node.index()].meshes.push(mesh);
    }

    pub fn add_material(&mut self, name: impl Into<String>) -> usize {
        self.materials.push(Material { name: name.into() });
        self.materials.len() - 1
    }

    pub fn add_animation(&mut self, animation: Animation) {
        self.animations.push(animation);
    }

    /// Validate all cross references and freeze the scene.
    pub fn build(mut self) -> Result<Scene, ImportError> {
        if self.materials.is_empty() && !self.meshes.is_empty() {
            self.materials.push(Material {
                name: DEFAULT_MATERIAL.into(),
            });
        }
        for node in &self.nodes {
            for &m in &node.meshes {
                if m >= self.meshes.len() {
                    return Err(ImportError::invalid(format!(
                        "node '{}' references mesh {m} of {}",
                        node.name,
                        self.meshes.len()
                    )));
                }
            }
        }
        for mesh in &self.meshes {
            validate_mesh(mesh, self.materials.len())?;
        }
        for anim in &self.animations {
            if !anim.ticks_per_second.is_finite() || anim.ticks_per_second < 0.0 {
                return Err(ImportError::invalid(format!(
                    "animation '{}' has ticks_per_second {}",
                    anim.name, anim.ticks_per_second
                )));
            }
        }

        let mut by_name = HashMap::with_capacity(self.nodes.len());
        for (i, node) in self.nodes.iter().enumerate() {
            by_name.entry(node.name.clone()).or_insert(NodeId(i as u32));
        }

        Ok(Scene {
            nodes: self.nodes,
            parents: self.parents,
            by_name,
            meshes: self.meshes,
            materials: self.materials,
            animations: self.animations,
        })
    }
}

fn validate_mesh(mesh: &Mesh, material_count: usize) -> Result<(), ImportError> {
    let vertex_count = mesh.positions.len();
    if !mesh.normals.is_empty() && mesh.normals.len() != vertex_count {
        return Err(ImportError::invalid(format!(
            "mesh '{}' has {} normals for {vertex_count} positions",
            mesh.name,
            mesh.normals.len()
        )));
    }
    if let Some(uvs) = &mesh.uvs {
        if uvs.len() != vertex_count {
            return Err(ImportError::invalid(format!(
                "mesh '{}' has {} uvs for {vertex_count} positions",
                mesh.name,
                uvs.len()
            )));
        }
    }
    for (i, face) in mesh.faces.iter().enumerate() {
        if let Some(&bad) = face.indices.iter().find(|&&v| v as usize >= vertex_count) {
            return Err(ImportError::invalid(format!(
                "mesh '{}' face {i} references vertex {bad} of {vertex_count}",
                mesh.name
            )));
        }
        let material = mesh.face_material(face);
        if material >= material_count {
            return Err(ImportError::invalid(format!(
                "mesh '{}' face {i} uses material {material} of {material_count}",
                mesh.name
            )));
        }
    }
    for bone in &mesh.bones {
        for w in &bone.weights {
            if w.vertex as usize >= vertex_count {
                return Err(ImportError::invalid(format!(
                    "mesh '{}' bone '{}' weights vertex {} of {vertex_count}",
                    mesh.name, bone.name, w.vertex
                )));
            }
            if !w.weight.is_finite() || w.weight < 0.0 {
                return Err(ImportError::invalid(format!(
                    "mesh '{}' bone '{}' has weight {} on vertex {}",
                    mesh.name, bone.name, w.weight, w.vertex
                )));
            }
        }
    }
    Ok(())
}
