//! Label fusion.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::FusionBlocks;
use crate::domain::{LabelScheme, Subject};
use crate::error::Result;
use crate::manifest::AtlasLabelManifest;
use crate::naming::SubjectLayout;
use crate::obs;
use crate::status::{stage_status, Stage};
use crate::toolkit::{FusionRequest, Toolkit};

/// Fusion needs at least two raters.
pub const MIN_FUSION_PAIRS: usize = 2;

/// Why fusion was not invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionSkip {
    TooFewPairs { pairs: usize },
    AlreadyFused,
}

/// Result of the fusion stage for one subject and scheme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusionOutcome {
    pub output_path: PathBuf,
    /// Whether the fused output exists after the stage.
    pub created: bool,
    /// Whether the fusion tool was invoked in this run.
    pub invoked: bool,
    pub skipped: Option<FusionSkip>,
}

/// Invokes label fusion once enough warped atlas/label pairs exist.
pub struct SegmentationRunner {
    toolkit: Arc<dyn Toolkit>,
    blocks: FusionBlocks,
    threads: usize,
}

impl SegmentationRunner {
    pub fn new(toolkit: Arc<dyn Toolkit>, blocks: FusionBlocks, threads: usize) -> Self {
        Self {
            toolkit,
            blocks,
            threads,
        }
    }

    pub async fn run(
        &self,
        subject: &Subject,
        layout: &SubjectLayout,
        scheme: &LabelScheme,
    ) -> Result<FusionOutcome> {
        let atlas_manifest = layout.atlas_manifest(scheme);
        let label_manifest = layout.label_manifest(scheme);
        let output_path = layout.fused(scheme);

        let manifest = AtlasLabelManifest::read(&atlas_manifest, &label_manifest)?;
        if manifest.len() < MIN_FUSION_PAIRS {
            warn!(
                subject = %subject.name,
                scheme = %scheme,
                pairs = manifest.len(),
                "not enough atlas/label pairs to fuse, skipping"
            );
            return Ok(FusionOutcome {
                created: output_path.exists(),
                output_path,
                invoked: false,
                skipped: Some(FusionSkip::TooFewPairs {
                    pairs: manifest.len(),
                }),
            });
        }

        if stage_status(layout, Stage::Fusion(scheme)).is_done() {
            obs::emit_stage_skipped("fusion", &output_path);
            return Ok(FusionOutcome {
                output_path,
                created: true,
                invoked: false,
                skipped: Some(FusionSkip::AlreadyFused),
            });
        }

        info!(
            subject = %subject.name,
            scheme = %scheme,
            pairs = manifest.len(),
            "fusing labels"
        );
        let request = FusionRequest {
            label_manifest,
            target: subject.image_path.clone(),
            atlas_manifest,
            output: output_path.clone(),
            blocks: self.blocks,
            threads: self.threads,
        };
        match self.toolkit.fuse_labels(&request).await {
            Ok(run) if !run.passed() => {
                warn!(subject = %subject.name, exit_code = run.exit_code, "label fusion exited with failure");
            }
            Ok(_) => {}
            Err(e) => warn!(subject = %subject.name, error = %e, "label fusion could not be run"),
        }

        let created = output_path.exists();
        if !created {
            warn!(subject = %subject.name, output = %output_path.display(), "fused output missing");
        }
        Ok(FusionOutcome {
            output_path,
            created,
            invoked: true,
            skipped: None,
        })
    }
}
