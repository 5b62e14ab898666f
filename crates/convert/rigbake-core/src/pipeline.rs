//! Converter: stage sequencing, cancellation and the public run API.
//!
//! Stages run in a fixed order:
//! `Idle → Importing → Classifying → BuildingSkeleton → BuildingSubmeshes →
//! BuildingAnimations → Exporting → Done`, with `Failed` on any error.
//! Neededness and transforms are complete before any parallel stage starts;
//! per-mesh and per-animation work then fans out on rayon and is collected in
//! input order.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::ConvertConfig;
use crate::diagnostics::{Diagnostics, Warning};
use crate::error::{ConvertError, Result};
use crate::export::ConversionSink;
use crate::ids::NodeId;
use crate::import::SceneImporter;
use crate::needed::{mark_needed_with, NeededOptions};
use crate::scene::{Material, Scene};
use crate::skeleton::{build_skeleton, Skeleton};
use crate::submesh::{partition, SkinContext, Submesh};
use crate::track::{build_animation, SkeletonAnimation, TrackPolicy};
use crate::transform::{NodeTransforms, TransformCache, TransformProvider, TransformResolver};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Idle,
    Importing,
    Classifying,
    BuildingSkeleton,
    BuildingSubmeshes,
    BuildingAnimations,
    Exporting,
    Done,
    Failed,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStage::Idle => "idle",
            RunStage::Importing => "importing",
            RunStage::Classifying => "classifying",
            RunStage::BuildingSkeleton => "building skeleton",
            RunStage::BuildingSubmeshes => "building submeshes",
            RunStage::BuildingAnimations => "building animations",
            RunStage::Exporting => "exporting",
            RunStage::Done => "done",
            RunStage::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ConvertError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Everything a run produces, handed to the sink as a whole.
#[derive(Clone, Debug, Serialize)]
pub struct ConversionOutput {
    pub basename: String,
    /// Bones plus the animations that drive them.
    pub skeleton: Skeleton,
    pub submeshes: Vec<Submesh>,
    pub materials: Vec<Material>,
    #[serde(skip)]
    pub warnings: Diagnostics,
    #[serde(skip)]
    transforms: NodeTransforms,
    #[serde(skip)]
    bind_pose: TransformCache,
}

impl ConversionOutput {
    pub fn transforms(&self) -> &NodeTransforms {
        &self.transforms
    }

    /// World bind transforms by node name, ready to be saved for a later
    /// run with `reuse_last_run_transforms`.
    pub fn transform_cache(&self) -> &TransformCache {
        &self.bind_pose
    }

    pub fn animations(&self) -> &[SkeletonAnimation] {
        &self.skeleton.animations
    }
}

/// Summary returned by [`Converter::convert`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConversionReport {
    pub basename: String,
    pub bones: usize,
    pub submeshes: usize,
    pub animations: usize,
    pub tracks: usize,
    pub warnings: Vec<Warning>,
}

impl ConversionReport {
    fn from_output(output: &ConversionOutput) -> Self {
        Self {
            basename: output.basename.clone(),
            bones: output.skeleton.len(),
            submeshes: output.submeshes.len(),
            animations: output.skeleton.animations.len(),
            tracks: output
                .skeleton
                .animations
                .iter()
                .map(|a| a.tracks.len())
                .sum(),
            warnings: output.warnings.iter().cloned().collect(),
        }
    }
}

/// One converter per job. Holds configuration, the optional transform
/// provider and the stage of the current (or last) run.
pub struct Converter {
    config: ConvertConfig,
    provider: Option<Arc<dyn TransformProvider>>,
    cancel: CancelToken,
    stage: RunStage,
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Converter")
            .field("config", &self.config)
            .field("has_provider", &self.provider.is_some())
            .field("stage", &self.stage)
            .finish()
    }
}

impl Default for Converter {
    fn default() -> Self {
        Self::new(ConvertConfig::default())
    }
}

impl Converter {
    pub fn new(config: ConvertConfig) -> Self {
        Self {
            config,
            provider: None,
            cancel: CancelToken::new(),
            stage: RunStage::Idle,
        }
    }

    /// Source of world transforms for `reuse_last_run_transforms`.
    pub fn with_transform_provider(mut self, provider: Arc<dyn TransformProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &ConvertConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn stage(&self) -> RunStage {
        self.stage
    }

    /// Import, convert and hand the result to `sink`.
    pub fn convert(
        &mut self,
        importer: &dyn SceneImporter,
        sink: &mut dyn ConversionSink,
    ) -> Result<ConversionReport> {
        self.stage = RunStage::Idle;
        let result = self.run(importer, sink);
        self.finish(&result);
        result
    }

    /// In-memory stages only: no importer, no sink.
    pub fn build(&mut self, scene: &Scene, basename: &str) -> Result<ConversionOutput> {
        self.stage = RunStage::Idle;
        let result = self.prepare().and_then(|_| self.build_stages(scene, basename));
        if let Ok(output) = &result {
            output.warnings.emit();
        }
        self.finish(&result);
        result
    }

    fn run(
        &mut self,
        importer: &dyn SceneImporter,
        sink: &mut dyn ConversionSink,
    ) -> Result<ConversionReport> {
        self.prepare()?;

        self.enter(RunStage::Importing)?;
        let imported = importer.import()?;
        self.progress(format_args!(
            "imported '{}': {} nodes, {} meshes, {} animations",
            imported.basename,
            imported.scene.len(),
            imported.scene.meshes.len(),
            imported.scene.animations.len()
        ));

        let output = self.build_stages(&imported.scene, &imported.basename)?;

        self.enter(RunStage::Exporting)?;
        sink.write(&output)?;

        output.warnings.emit();
        let report = ConversionReport::from_output(&output);
        self.progress(format_args!(
            "converted '{}': {} bones, {} submeshes, {} animations ({} tracks)",
            report.basename, report.bones, report.submeshes, report.animations, report.tracks
        ));
        Ok(report)
    }

    fn prepare(&self) -> Result<()> {
        self.config.validate()?;
        if self.config.reuse_last_run_transforms && self.provider.is_none() {
            return Err(ConvertError::Config(
                "reuse_last_run_transforms is set but no transform provider was given".into(),
            ));
        }
        Ok(())
    }

    fn build_stages(&mut self, scene: &Scene, basename: &str) -> Result<ConversionOutput> {
        let mut warnings = Diagnostics::new();

        self.enter(RunStage::Classifying)?;
        let needed = mark_needed_with(
            scene,
            NeededOptions {
                include_bone_descendants: self.config.include_bone_descendants,
            },
            &mut warnings,
        );
        let resolver = match (&self.provider, self.config.reuse_last_run_transforms) {
            (Some(provider), true) => TransformResolver::cached(scene, &**provider),
            _ => TransformResolver::fresh(scene),
        };
        let transforms = resolver.resolve_all()?;

        self.enter(RunStage::BuildingSkeleton)?;
        let mut skeleton = build_skeleton(scene, &needed, &transforms)?;
        self.progress(format_args!(
            "skeleton: {} bones from {} nodes",
            skeleton.len(),
            scene.len()
        ));

        self.enter(RunStage::BuildingSubmeshes)?;
        let submeshes = self.partition_meshes(scene, &skeleton, &transforms, &mut warnings)?;

        self.enter(RunStage::BuildingAnimations)?;
        skeleton.animations = self.build_animations(scene, &skeleton, &transforms, &mut warnings)?;

        let bind_pose = TransformCache::from_transforms(scene, &transforms);
        Ok(ConversionOutput {
            basename: basename.to_string(),
            skeleton,
            submeshes,
            materials: scene.materials.clone(),
            warnings,
            transforms,
            bind_pose,
        })
    }

    fn partition_meshes(
        &self,
        scene: &Scene,
        skeleton: &Skeleton,
        transforms: &NodeTransforms,
        warnings: &mut Diagnostics,
    ) -> Result<Vec<Submesh>> {
        let cancel = &self.cancel;
        let one = |&(node, mesh): &(NodeId, usize)| -> Result<(Vec<Submesh>, Diagnostics)> {
            cancel.check()?;
            let mut diag = Diagnostics::new();
            let skin = SkinContext {
                skeleton,
                fallback: skeleton.nearest_bone(scene, node),
            };
            let parts = partition(
                mesh,
                &scene.meshes[mesh],
                &scene.materials,
                transforms.world(node),
                skin,
                &mut diag,
            );
            Ok((parts, diag))
        };

        let instances = scene.mesh_instances();
        let results: Vec<(Vec<Submesh>, Diagnostics)> = if self.config.parallel {
            instances.par_iter().map(one).collect::<Result<_>>()?
        } else {
            instances.iter().map(one).collect::<Result<_>>()?
        };

        let mut out = Vec::new();
        for (parts, diag) in results {
            out.extend(parts);
            warnings.merge(diag);
        }
        Ok(out)
    }

    fn build_animations(
        &self,
        scene: &Scene,
        skeleton: &Skeleton,
        transforms: &NodeTransforms,
        warnings: &mut Diagnostics,
    ) -> Result<Vec<SkeletonAnimation>> {
        let policy = TrackPolicy::from(&self.config);
        let name_override = match (&self.config.custom_animation_name, scene.animations.len()) {
            (Some(name), 1) => Some(name.as_str()),
            (Some(name), n) => {
                log::debug!("custom animation name '{name}' ignored: scene has {n} animations");
                None
            }
            (None, _) => None,
        };

        let cancel = &self.cancel;
        let one = |index: usize| -> Result<(SkeletonAnimation, Diagnostics)> {
            cancel.check()?;
            let mut diag = Diagnostics::new();
            let anim = build_animation(
                &scene.animations[index],
                index,
                skeleton,
                transforms,
                &policy,
                name_override,
                &mut diag,
            );
            Ok((anim, diag))
        };

        let count = scene.animations.len();
        let results: Vec<(SkeletonAnimation, Diagnostics)> = if self.config.parallel {
            (0..count).into_par_iter().map(one).collect::<Result<_>>()?
        } else {
            (0..count).map(one).collect::<Result<_>>()?
        };

        let mut out = Vec::with_capacity(results.len());
        for (anim, diag) in results {
            out.push(anim);
            warnings.merge(diag);
        }
        Ok(out)
    }

    /// Move to `stage` unless the run was cancelled.
    fn enter(&mut self, stage: RunStage) -> Result<()> {
        self.cancel.check()?;
        log::debug!("stage: {} -> {}", self.stage, stage);
        self.stage = stage;
        Ok(())
    }

    fn finish<T>(&mut self, result: &Result<T>) {
        let next = match result {
            Ok(_) => RunStage::Done,
            Err(e) => {
                log::error!("conversion failed during {}: {e}", self.stage);
                RunStage::Failed
            }
        };
        log::debug!("stage: {} -> {}", self.stage, next);
        self.stage = next;
    }

    fn progress(&self, args: fmt::Arguments<'_>) {
        if !self.config.quiet {
            log::info!("{args}");
        }
    }
}
