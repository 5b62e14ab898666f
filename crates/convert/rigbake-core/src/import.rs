//! Importer seam and the JSON scene document.
//!
//! The document mirrors the generic graph a model importer produces. The node
//! tree comes in one of two shapes:
//! - `root`: nested nodes (`name`, `transform` as 16 column-major floats,
//!   `meshes` indices, `children`);
//! - `nodes`: a flat list of the same fields with a `parent` index instead of
//!   `children`. The first entry is the root; every parent precedes its children.
//!
//! `meshes`, `materials` and `animations` are flat lists (see [`crate::scene`]).
//!
//! Nested documents are bounded by serde_json's recursion limit (about 60
//! levels of nodes). The flat form has no depth limit, and both shapes are
//! turned into the scene arena without recursion.

use std::path::{Path, PathBuf};

use glam::Mat4;
use serde::{Deserialize, Serialize};

use crate::error::ImportError;
use crate::ids::NodeId;
use crate::scene::{Animation, Material, Mesh, Scene, SceneBuilder};

/// A parsed scene plus the identity used to name output artifacts.
#[derive(Clone, Debug)]
pub struct ImportedScene {
    pub basename: String,
    pub scene: Scene,
}

/// Source of the scene graph consumed by the converter.
pub trait SceneImporter {
    fn import(&self) -> Result<ImportedScene, ImportError>;
}

/// Hands out an already built scene.
#[derive(Clone, Debug)]
pub struct InMemoryImporter {
    basename: String,
    scene: Scene,
}

impl InMemoryImporter {
    pub fn new(basename: impl Into<String>, scene: Scene) -> Self {
        Self {
            basename: basename.into(),
            scene,
        }
    }
}

impl SceneImporter for InMemoryImporter {
    fn import(&self) -> Result<ImportedScene, ImportError> {
        Ok(ImportedScene {
            basename: self.basename.clone(),
            scene: self.scene.clone(),
        })
    }
}

/// Reads a JSON scene document from disk; the basename is the file stem.
#[derive(Clone, Debug)]
pub struct JsonSceneImporter {
    path: PathBuf,
}

impl JsonSceneImporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SceneImporter for JsonSceneImporter {
    fn import(&self) -> Result<ImportedScene, ImportError> {
        let text = std::fs::read_to_string(&self.path).map_err(|source| ImportError::Io {
            path: self.path.clone(),
            source,
        })?;
        let scene = parse_scene_json(&text)?;
        Ok(ImportedScene {
            basename: basename_of(&self.path),
            scene,
        })
    }
}

fn basename_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "scene".to_string())
}

/// Parse and validate a JSON scene document.
pub fn parse_scene_json(s: &str) -> Result<Scene, ImportError> {
    let doc: SceneDocument =
        serde_json::from_str(s).map_err(|e| ImportError::Parse(e.to_string()))?;
    doc.into_scene()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SceneDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<NodeDocument>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<FlatNodeDocument>,
    #[serde(default)]
    pub meshes: Vec<Mesh>,
    #[serde(default)]
    pub materials: Vec<Material>,
    #[serde(default)]
    pub animations: Vec<Animation>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeDocument {
    pub name: String,
    #[serde(default)]
    pub transform: Mat4,
    #[serde(default)]
    pub meshes: Vec<usize>,
    #[serde(default)]
    pub children: Vec<NodeDocument>,
}

/// Entry of the flat node list.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FlatNodeDocument {
    pub name: String,
    /// Index into the node list; `None` only on the first entry.
    #[serde(default)]
    pub parent: Option<usize>,
    #[serde(default)]
    pub transform: Mat4,
    #[serde(default)]
    pub meshes: Vec<usize>,
}

impl SceneDocument {
    pub fn into_scene(self) -> Result<Scene, ImportError> {
        let SceneDocument {
            root,
            nodes,
            meshes,
            materials,
            animations,
        } = self;

        let mut builder = match (root, nodes.is_empty()) {
            (Some(root), true) => nested_nodes(root),
            (None, false) => flat_nodes(nodes)?,
            (Some(_), false) => {
                return Err(ImportError::invalid("document has both `root` and `nodes`"))
            }
            (None, true) => return Err(ImportError::invalid("document has no nodes")),
        };

        for mesh in meshes {
            builder.add_mesh(mesh);
        }
        for material in materials {
            builder.add_material(material.name);
        }
        for animation in animations {
            builder.add_animation(animation);
        }
        builder.build()
    }
}

fn flat_nodes(nodes: Vec<FlatNodeDocument>) -> Result<SceneBuilder, ImportError> {
    let mut nodes = nodes.into_iter().enumerate();
    let Some((_, root)) = nodes.next() else {
        return Err(ImportError::invalid("document has no nodes"));
    };
    if root.parent.is_some() {
        return Err(ImportError::invalid(format!(
            "first node '{}' must not have a parent",
            root.name
        )));
    }

    let mut builder = SceneBuilder::new(root.name, root.transform);
    let mut ids = vec![builder.root()];
    for m in root.meshes {
        builder.attach_mesh(ids[0], m);
    }
    for (i, node) in nodes {
        let parent = match node.parent {
            Some(p) if p < i => ids[p],
            Some(p) => {
                return Err(ImportError::invalid(format!(
                    "node {i} '{}' has parent {p}; parents must come first",
                    node.name
                )))
            }
            None => {
                return Err(ImportError::invalid(format!(
                    "node {i} '{}' has no parent; only the first node is a root",
                    node.name
                )))
            }
        };
        let id = builder.add_node(parent, node.name, node.transform);
        for m in node.meshes {
            builder.attach_mesh(id, m);
        }
        ids.push(id);
    }
    Ok(builder)
}

fn nested_nodes(root: NodeDocument) -> SceneBuilder {
    let mut builder = SceneBuilder::new(root.name, root.transform);
    let root_id = builder.root();
    for m in root.meshes {
        builder.attach_mesh(root_id, m);
    }

    // Children are pushed in reverse so siblings come off the stack in order.
    let mut stack: Vec<(NodeId, NodeDocument)> = root
        .children
        .into_iter()
        .rev()
        .map(|c| (root_id, c))
        .collect();
    while let Some((parent, doc)) = stack.pop() {
        let id = builder.add_node(parent, doc.name, doc.transform);
        for m in doc.meshes {
            builder.attach_mesh(id, m);
        }
        stack.extend(doc.children.into_iter().rev().map(|c| (id, c)));
    }
    builder
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattens_in_preorder_keeping_sibling_order() {
        let json = r#"{
            "root": { "name": "root", "children": [
                { "name": "a", "children": [ { "name": "a1" } ] },
                { "name": "b" }
            ] }
        }"#;
        let scene = parse_scene_json(json).unwrap();
        let names: Vec<_> = scene.node_ids().map(|id| scene.node(id).name.clone()).collect();
        assert_eq!(names, vec!["root", "a", "a1", "b"]);
        let root_children: Vec<_> = scene
            .node(scene.root())
            .children
            .iter()
            .map(|&c| scene.node(c).name.clone())
            .collect();
        assert_eq!(root_children, vec!["a", "b"]);
    }

    #[test]
    fn transform_is_column_major() {
        let json = r#"{
            "root": { "name": "root", "transform":
                [1,0,0,0, 0,1,0,0, 0,0,1,0, 5,6,7,1] }
        }"#;
        let scene = parse_scene_json(json).unwrap();
        let t = scene.node(scene.root()).transform;
        assert_eq!(t.w_axis.truncate(), glam::Vec3::new(5.0, 6.0, 7.0));
    }

    #[test]
    fn flat_nodes_follow_parent_indices() {
        let json = r#"{
            "nodes": [
                { "name": "root" },
                { "name": "a", "parent": 0 },
                { "name": "b", "parent": 0 },
                { "name": "a1", "parent": 1,
                  "transform": [1,0,0,0, 0,1,0,0, 0,0,1,0, 0,2,0,1] }
            ]
        }"#;
        let scene = parse_scene_json(json).unwrap();
        let a1 = scene.find("a1").unwrap();
        assert_eq!(scene.parent(a1), scene.find("a"));
        assert_eq!(scene.node(scene.root()).children.len(), 2);
    }

    #[test]
    fn flat_nodes_reject_forward_parents() {
        let json = r#"{
            "nodes": [
                { "name": "root" },
                { "name": "a", "parent": 2 },
                { "name": "b", "parent": 0 }
            ]
        }"#;
        assert!(matches!(
            parse_scene_json(json),
            Err(ImportError::Invalid { .. })
        ));
        let both = r#"{ "root": { "name": "r" }, "nodes": [ { "name": "r" } ] }"#;
        assert!(matches!(
            parse_scene_json(both),
            Err(ImportError::Invalid { .. })
        ));
    }

    #[test]
    fn parse_errors_are_import_errors() {
        let err = parse_scene_json("{ not json").unwrap_err();
        assert!(matches!(err, ImportError::Parse(_)));
    }

    #[test]
    fn bad_mesh_reference_is_rejected() {
        let json = r#"{ "root": { "name": "root", "meshes": [2] } }"#;
        assert!(matches!(
            parse_scene_json(json),
            Err(ImportError::Invalid { .. })
        ));
    }
}
