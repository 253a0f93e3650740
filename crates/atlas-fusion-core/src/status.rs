//! Stage completion predicate.
//!
//! The filesystem is the pipeline's only state: a stage is `Done` exactly
//! when its declared output exists. A collaborator that exited without
//! producing output therefore leaves its stage `Pending`, and the next run
//! issues it again.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{AtlasEntry, LabelScheme};
use crate::naming::SubjectLayout;

/// Completion state of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Done,
}

impl StageStatus {
    pub fn of(path: &Path) -> Self {
        if path.exists() {
            StageStatus::Done
        } else {
            StageStatus::Pending
        }
    }

    pub fn is_done(self) -> bool {
        self == StageStatus::Done
    }

    pub fn is_pending(self) -> bool {
        self == StageStatus::Pending
    }
}

/// A unit of pipeline work keyed by (subject, scheme, stage).
#[derive(Debug, Clone, Copy)]
pub enum Stage<'a> {
    /// Registration of one atlas to the subject.
    Registration(&'a AtlasEntry),
    /// Transform files written by registration, required for resampling.
    Transforms(&'a AtlasEntry),
    /// Warped template grayscale in subject space.
    WarpGrayscale(&'a AtlasEntry),
    /// Warped template label file in subject space.
    WarpLabel(&'a Path),
    /// Fused label map for a scheme.
    Fusion(&'a LabelScheme),
    /// Partial-volume corrected map for a scheme.
    Correction(&'a LabelScheme),
    /// Combined parcellation for one corrected file name.
    Parcellation(&'a str),
}

impl Stage<'_> {
    /// Output paths that must all exist for the stage to be done.
    pub fn outputs(&self, layout: &SubjectLayout) -> Vec<PathBuf> {
        match self {
            Stage::Registration(atlas) | Stage::WarpGrayscale(atlas) => {
                vec![layout.warped_grayscale(atlas)]
            }
            Stage::Transforms(atlas) => vec![
                layout.affine_transform(atlas),
                layout.deformable_field(atlas),
            ],
            Stage::WarpLabel(label) => vec![layout.warped_label(label)],
            Stage::Fusion(scheme) => vec![layout.fused(scheme)],
            Stage::Correction(scheme) => vec![layout.corrected(scheme)],
            Stage::Parcellation(corrected) => layout.parcellated(corrected).into_iter().collect(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Registration(_) => "registration",
            Stage::Transforms(_) => "transforms",
            Stage::WarpGrayscale(_) => "warp_grayscale",
            Stage::WarpLabel(_) => "warp_label",
            Stage::Fusion(_) => "fusion",
            Stage::Correction(_) => "correction",
            Stage::Parcellation(_) => "parcellation",
        }
    }
}

/// Status of `stage` for the subject owning `layout`.
pub fn stage_status(layout: &SubjectLayout, stage: Stage<'_>) -> StageStatus {
    let outputs = stage.outputs(layout);
    if !outputs.is_empty() && outputs.iter().all(|p| p.exists()) {
        StageStatus::Done
    } else {
        StageStatus::Pending
    }
}
