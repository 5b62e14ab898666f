//! Bind-time world transforms.
//!
//! `world(root) = local(root)` and `world(node) = world(parent) * local(node)`.
//! The resolver memoizes every node it touches, so each local transform is
//! multiplied in exactly once no matter which node is asked for first.
//!
//! Instead of composing from the scene, transforms can come from a
//! [`TransformProvider`], typically a [`TransformCache`] recorded by an earlier
//! run of the same scene. Those values are used verbatim; a node missing from
//! the provider means the cache belongs to another scene and the run fails.
//!
//! Providers are keyed by [`node_keys`]: the node name, with `#n` appended to
//! later nodes that repeat an earlier name, so namesakes never share an entry.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use glam::Mat4;
use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};

use crate::error::{ConvertError, Result};
use crate::ids::NodeId;
use crate::scene::Scene;

/// Current on-disk cache format.
pub const CACHE_VERSION: u32 = 1;

/// Supplies precomputed world transforms by node key (see [`node_keys`]).
pub trait TransformProvider: Send + Sync {
    fn world_transform(&self, key: &str) -> Option<Mat4>;
}

/// One key per node, in arena order. The first node with a name keys as the
/// bare name; later namesakes get `name#1`, `name#2`, ... skipping any key
/// already taken by a real node name.
pub fn node_keys(scene: &Scene) -> Vec<String> {
    let mut keys: Vec<Option<String>> = vec![None; scene.len()];
    let mut taken: HashSet<String> = HashSet::with_capacity(scene.len());
    for id in scene.node_ids() {
        let name = &scene.node(id).name;
        if taken.insert(name.clone()) {
            keys[id.index()] = Some(name.clone());
        }
    }

    let mut next: HashMap<&str, usize> = HashMap::new();
    scene
        .node_ids()
        .zip(keys)
        .map(|(id, key)| {
            if let Some(key) = key {
                return key;
            }
            let name = scene.node(id).name.as_str();
            let n = next.entry(name).or_insert(1);
            loop {
                let candidate = format!("{name}#{n}");
                *n += 1;
                if taken.insert(candidate.clone()) {
                    return candidate;
                }
            }
        })
        .collect()
}

/// Node key → world transform table; also the persisted cache format.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransformCache {
    version: u32,
    nodes: BTreeMap<String, Mat4>,
}

impl Default for TransformCache {
    fn default() -> Self {
        Self {
            version: CACHE_VERSION,
            nodes: BTreeMap::new(),
        }
    }
}

impl TransformCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: impl Into<String>, world: Mat4) {
        self.nodes.insert(node.into(), world);
    }

    pub fn get(&self, node: &str) -> Option<Mat4> {
        self.nodes.get(node).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Snapshot of resolved transforms, keyed by [`node_keys`].
    pub fn from_transforms(scene: &Scene, transforms: &NodeTransforms) -> Self {
        let mut cache = Self::new();
        for (id, key) in scene.node_ids().zip(node_keys(scene)) {
            cache.insert(key, transforms.world(id));
        }
        cache
    }

    /// Reuse mode: the file is only ever opened for reading.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|source| ConvertError::CacheIo {
            path: path.to_path_buf(),
            source,
        })?;
        let cache: TransformCache = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| ConvertError::CacheFormat(format!("{}: {e}", path.display())))?;
        if cache.version != CACHE_VERSION {
            return Err(ConvertError::CacheFormat(format!(
                "{}: version {} (expected {CACHE_VERSION})",
                path.display(),
                cache.version
            )));
        }
        Ok(cache)
    }

    /// Record mode: the file is created (or truncated) and only written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let io_err = |source: std::io::Error| ConvertError::CacheIo {
            path: path.to_path_buf(),
            source,
        };
        let file = File::create(path).map_err(io_err)?;
        let mut w = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut w, self)
            .map_err(|e| ConvertError::CacheFormat(e.to_string()))?;
        w.flush().map_err(io_err)
    }
}

impl TransformProvider for TransformCache {
    fn world_transform(&self, key: &str) -> Option<Mat4> {
        self.get(key)
    }
}

enum Source<'a> {
    Fresh,
    Cached {
        provider: &'a dyn TransformProvider,
        keys: Vec<String>,
    },
}

/// Memoizing world transform resolver over one scene.
pub struct TransformResolver<'a> {
    scene: &'a Scene,
    source: Source<'a>,
    memo: Vec<Option<Mat4>>,
}

impl<'a> TransformResolver<'a> {
    /// Compose transforms from the scene's local matrices.
    pub fn fresh(scene: &'a Scene) -> Self {
        Self {
            scene,
            source: Source::Fresh,
            memo: vec![None; scene.len()],
        }
    }

    /// Take every world transform from `provider`.
    pub fn cached(scene: &'a Scene, provider: &'a dyn TransformProvider) -> Self {
        Self {
            scene,
            source: Source::Cached {
                provider,
                keys: node_keys(scene),
            },
            memo: vec![None; scene.len()],
        }
    }

    pub fn world_transform(&mut self, id: NodeId) -> Result<Mat4> {
        if let Some(m) = self.memo[id.index()] {
            return Ok(m);
        }
        match &self.source {
            Source::Cached { provider, keys } => {
                let key = &keys[id.index()];
                let m = provider
                    .world_transform(key)
                    .ok_or_else(|| ConvertError::CacheIncompatible { node: key.clone() })?;
                self.memo[id.index()] = Some(m);
                Ok(m)
            }
            Source::Fresh => {
                // Climb to the nearest resolved ancestor, then compose back down.
                let mut chain = vec![id];
                let mut acc = Mat4::IDENTITY;
                let mut cursor = self.scene.parent(id);
                while let Some(p) = cursor {
                    if let Some(m) = self.memo[p.index()] {
                        acc = m;
                        break;
                    }
                    chain.push(p);
                    cursor = self.scene.parent(p);
                }
                for &n in chain.iter().rev() {
                    acc *= self.scene.node(n).transform;
                    self.memo[n.index()] = Some(acc);
                }
                Ok(acc)
            }
        }
    }

    /// Resolve every node and freeze the result.
    pub fn resolve_all(mut self) -> Result<NodeTransforms> {
        let mut world = Vec::with_capacity(self.scene.len());
        for id in self.scene.node_ids() {
            world.push(self.world_transform(id)?);
        }
        let cached = matches!(self.source, Source::Cached { .. });
        let local = self
            .scene
            .node_ids()
            .map(|id| {
                if !cached {
                    return self.scene.node(id).transform;
                }
                match self.scene.parent(id) {
                    Some(p) => world[p.index()].inverse() * world[id.index()],
                    None => world[id.index()],
                }
            })
            .collect();
        Ok(NodeTransforms {
            world,
            local,
            cached,
        })
    }
}

/// Resolved bind transforms for every node of a scene, indexed by [`NodeId`].
#[derive(Clone, Debug, PartialEq)]
pub struct NodeTransforms {
    world: Vec<Mat4>,
    local: Vec<Mat4>,
    cached: bool,
}

impl NodeTransforms {
    #[inline]
    pub fn world(&self, id: NodeId) -> Mat4 {
        self.world[id.index()]
    }

    /// Bind transform relative to the parent. From a cache this is derived
    /// from the cached world transforms rather than read from the scene.
    #[inline]
    pub fn local(&self, id: NodeId) -> Mat4 {
        self.local[id.index()]
    }

    pub fn is_cached(&self) -> bool {
        self.cached
    }

    pub fn len(&self) -> usize {
        self.world.len()
    }

    pub fn is_empty(&self) -> bool {
        self.world.is_empty()
    }
}
