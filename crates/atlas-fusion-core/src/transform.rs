//! Resampling of template grayscale and template labels into subject space.
//!
//! Both passes reuse the transform written by the atlas's registration job,
//! so a template and its labels always share one mapping. The grayscale pass
//! completes, batch barriers included, before the label pass starts.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::context::SubjectContext;
use crate::pool::{BatchPool, BatchReport};
use crate::selector::MatchedAtlas;
use crate::status::{stage_status, Stage};
use crate::toolkit::{Interpolation, ResampleRequest, Toolkit};

/// Outcome of both resampling passes for one subject and scheme.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformReport {
    pub grayscale: BatchReport,
    pub labels: BatchReport,
    /// Atlases skipped in the label pass because the template has no label file.
    pub missing_labels: usize,
    /// Atlases skipped because registration left no transform behind.
    pub missing_transforms: usize,
}

/// Applies registration transforms to template grayscale and labels.
pub struct TransformApplier {
    toolkit: Arc<dyn Toolkit>,
    pool: BatchPool,
}

impl TransformApplier {
    pub fn new(toolkit: Arc<dyn Toolkit>, pool: BatchPool) -> Self {
        Self { toolkit, pool }
    }

    fn request(
        ctx: &SubjectContext,
        matched: &MatchedAtlas,
        source: PathBuf,
        output: PathBuf,
        interpolation: Interpolation,
    ) -> ResampleRequest {
        ResampleRequest {
            source,
            output,
            reference: ctx.subject.image_path.clone(),
            deformable_field: ctx.layout.deformable_field(&matched.atlas),
            affine_transform: ctx.layout.affine_transform(&matched.atlas),
            interpolation,
        }
    }

    fn has_transforms(ctx: &SubjectContext, matched: &MatchedAtlas) -> bool {
        stage_status(&ctx.layout, Stage::Transforms(&matched.atlas)).is_done()
    }

    /// Grayscale resampling jobs for atlases whose warped template is missing.
    pub fn grayscale_requests(&self, ctx: &SubjectContext) -> (Vec<ResampleRequest>, usize) {
        let mut requests = Vec::new();
        let mut missing_transforms = 0;
        for matched in &ctx.matched {
            if stage_status(&ctx.layout, Stage::WarpGrayscale(&matched.atlas)).is_done() {
                continue;
            }
            if !Self::has_transforms(ctx, matched) {
                debug!(atlas = %matched.atlas.template_name, "no transform to re-apply");
                missing_transforms += 1;
                continue;
            }
            requests.push(Self::request(
                ctx,
                matched,
                matched.atlas.template_path.clone(),
                ctx.layout.warped_grayscale(&matched.atlas),
                Interpolation::Smooth,
            ));
        }
        (requests, missing_transforms)
    }

    /// Label resampling jobs for atlases whose warped label is missing.
    pub fn label_requests(&self, ctx: &SubjectContext) -> (Vec<ResampleRequest>, usize, usize) {
        let mut requests = Vec::new();
        let mut missing_labels = 0;
        let mut missing_transforms = 0;
        for matched in &ctx.matched {
            if !matched.label_exists {
                warn!(
                    atlas = %matched.atlas.template_name,
                    label = %matched.label_path.display(),
                    "template has no label file for this scheme"
                );
                missing_labels += 1;
                continue;
            }
            if stage_status(&ctx.layout, Stage::WarpLabel(&matched.label_path)).is_done() {
                continue;
            }
            if !Self::has_transforms(ctx, matched) {
                debug!(atlas = %matched.atlas.template_name, "no transform for label resampling");
                missing_transforms += 1;
                continue;
            }
            requests.push(Self::request(
                ctx,
                matched,
                matched.label_path.clone(),
                ctx.layout.warped_label(&matched.label_path),
                Interpolation::LabelPreserving,
            ));
        }
        (requests, missing_labels, missing_transforms)
    }

    async fn resample_all(&self, stage: &str, requests: Vec<ResampleRequest>) -> BatchReport {
        if requests.is_empty() {
            return BatchReport::default();
        }
        let expected: Vec<PathBuf> = requests.iter().map(|r| r.output.clone()).collect();
        let toolkit = Arc::clone(&self.toolkit);
        let outcomes = self
            .pool
            .run(stage, requests, move |request| {
                let toolkit = Arc::clone(&toolkit);
                async move { toolkit.resample(&request).await }
            })
            .await;
        BatchReport::tally(stage, &outcomes, &expected)
    }

    /// Run the grayscale pass, then the label pass.
    pub async fn run(&self, ctx: &SubjectContext) -> TransformReport {
        let (gray_requests, gray_missing) = self.grayscale_requests(ctx);
        if !gray_requests.is_empty() {
            info!(subject = %ctx.name(), jobs = gray_requests.len(), "re-applying grayscale transforms");
        }
        let grayscale = self.resample_all("warp_grayscale", gray_requests).await;

        let (label_requests, missing_labels, label_missing) = self.label_requests(ctx);
        if !label_requests.is_empty() {
            info!(subject = %ctx.name(), jobs = label_requests.len(), "propagating template labels");
        }
        let labels = self.resample_all("warp_label", label_requests).await;

        TransformReport {
            grayscale,
            labels,
            missing_labels,
            missing_transforms: gray_missing.max(label_missing),
        }
    }
}
