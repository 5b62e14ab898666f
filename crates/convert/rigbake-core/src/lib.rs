//! rigbake core (engine-agnostic)
//!
//! Turns an imported scene graph into a skeletal-mesh asset: a bone hierarchy
//! with bind transforms, per-material submeshes carrying up to four bone
//! weights per vertex, and speed-scaled keyframe tracks.
//!
//! Pipeline: neededness → world transforms → skeleton → submeshes → tracks,
//! driven by [`Converter`]. Importers and writers plug in through
//! [`SceneImporter`] and [`ConversionSink`].

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod export;
pub mod ids;
pub mod import;
pub mod needed;
pub mod pipeline;
pub mod scene;
pub mod skeleton;
pub mod submesh;
pub mod track;
pub mod transform;

// Re-exports for consumers (tools, tests)
pub use config::ConvertConfig;
pub use diagnostics::{Diagnostics, Warning};
pub use error::{ConvertError, ImportError, Result};
pub use export::{ConversionSink, JsonSink, MemorySink};
pub use ids::{BoneId, NodeId};
pub use import::{parse_scene_json, ImportedScene, InMemoryImporter, JsonSceneImporter, SceneImporter};
pub use needed::{mark_needed, mark_needed_with, NeededOptions, NeededSet};
pub use pipeline::{CancelToken, ConversionOutput, ConversionReport, Converter, RunStage};
pub use scene::{Animation, Face, Material, Mesh, MeshBone, NodeChannel, Scene, SceneBuilder};
pub use skeleton::{build_skeleton, Bone, Skeleton};
pub use submesh::{partition, Submesh, Vertex, MAX_INFLUENCES};
pub use track::{build_animation, build_track, AnimationTrack, Keyframe, SkeletonAnimation, TrackPolicy};
pub use transform::{NodeTransforms, TransformCache, TransformProvider, TransformResolver};
