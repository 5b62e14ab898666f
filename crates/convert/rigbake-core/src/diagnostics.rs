//! Non-fatal findings collected during a run.
//!
//! Stages push [`Warning`]s into a private [`Diagnostics`] buffer; buffers are
//! merged in input order and surfaced once when the run ends.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// Channel was empty or had out-of-order keys; skipped or sorted.
    MalformedAnimation {
        animation: String,
        node: String,
        reason: String,
    },
    /// Vertices carrying more than four influences were truncated.
    OverInfluencedVertex {
        mesh: String,
        vertices: usize,
        max_influences: usize,
    },
    /// A skin binding names a node that is not in the scene.
    UnknownSkinBone { mesh: String, bone: String },
    /// Skinned vertices without any influence were bound to their nearest bone.
    UnweightedVertex { mesh: String, vertices: usize },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::MalformedAnimation {
                animation,
                node,
                reason,
            } => write!(f, "animation '{animation}', node '{node}': {reason}"),
            Warning::OverInfluencedVertex {
                mesh,
                vertices,
                max_influences,
            } => write!(
                f,
                "mesh '{mesh}': {vertices} vertices had more than 4 influences (max {max_influences}); kept the 4 largest"
            ),
            Warning::UnknownSkinBone { mesh, bone } => {
                write!(f, "mesh '{mesh}': skin bone '{bone}' has no scene node; weights ignored")
            }
            Warning::UnweightedVertex { mesh, vertices } => write!(
                f,
                "mesh '{mesh}': {vertices} skinned vertices had no influences; bound to nearest bone"
            ),
        }
    }
}

/// Ordered warning buffer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, warning: Warning) {
        self.warnings.push(warning);
    }

    /// Append another buffer, keeping its order after ours.
    pub fn merge(&mut self, other: Diagnostics) {
        self.warnings.extend(other.warnings);
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.warnings.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Warning> {
        self.warnings.iter()
    }

    pub fn into_vec(self) -> Vec<Warning> {
        self.warnings
    }

    /// Log every warning in one block.
    pub fn emit(&self) {
        if self.warnings.is_empty() {
            return;
        }
        log::warn!("{} warning(s) during conversion:", self.warnings.len());
        for w in &self.warnings {
            log::warn!("  {w}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_order() {
        let mut a = Diagnostics::new();
        a.push(Warning::UnknownSkinBone {
            mesh: "m".into(),
            bone: "a".into(),
        });
        let mut b = Diagnostics::new();
        b.push(Warning::UnknownSkinBone {
            mesh: "m".into(),
            bone: "b".into(),
        });
        a.merge(b);
        let bones: Vec<_> = a
            .iter()
            .map(|w| match w {
                Warning::UnknownSkinBone { bone, .. } => bone.clone(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(bones, vec!["a".to_string(), "b".to_string()]);
    }
}
