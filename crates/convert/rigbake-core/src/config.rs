//! Conversion options.

use serde::{Deserialize, Serialize};

use crate::error::{ConvertError, Result};

/// Options recognized by the converter. Every field has a default, so a
/// partial JSON object is a valid configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertConfig {
    /// Drop trailing keyframes that repeat the previous key (exporters that
    /// pad an animation past its last real change).
    pub cut_trailing_static_animation: bool,
    /// Take bind transforms from a prior run's cache instead of the scene.
    /// Requires a transform provider on the converter.
    pub reuse_last_run_transforms: bool,
    /// Playback speed factor; 2.0 halves every key time.
    pub animation_speed_modifier: f32,
    /// Name for the animation; only applied when the scene has exactly one.
    pub custom_animation_name: Option<String>,
    /// Mute progress logging. Warnings are still reported.
    pub quiet: bool,

    /// Drop tracks whose keys never change.
    pub omit_static_tracks: bool,
    /// Also turn descendants of skinned nodes into bones.
    pub include_bone_descendants: bool,
    /// Partition meshes and build animations on the rayon pool.
    pub parallel: bool,
    /// Express keyframes relative to each bone's bind pose.
    pub relative_to_bind_pose: bool,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            cut_trailing_static_animation: false,
            reuse_last_run_transforms: false,
            animation_speed_modifier: 1.0,
            custom_animation_name: None,
            quiet: false,
            omit_static_tracks: false,
            include_bone_descendants: false,
            parallel: true,
            relative_to_bind_pose: true,
        }
    }
}

impl ConvertConfig {
    pub fn from_json_str(s: &str) -> Result<Self> {
        let cfg: ConvertConfig = serde_json::from_str(s)
            .map_err(|e| ConvertError::Config(format!("parse error: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let speed = self.animation_speed_modifier;
        if !speed.is_finite() || speed <= 0.0 {
            return Err(ConvertError::Config(format!(
                "animation_speed_modifier must be finite and > 0 (got {speed})"
            )));
        }
        Ok(())
    }
}
