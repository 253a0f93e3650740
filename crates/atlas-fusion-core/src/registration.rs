//! Registration scheduling.

use std::sync::Arc;

use tracing::info;

use crate::context::SubjectContext;
use crate::pool::{BatchPool, BatchReport};
use crate::selector::MatchedAtlas;
use crate::status::{stage_status, Stage};
use crate::toolkit::{RegistrationParams, RegistrationRequest, Toolkit};

/// Registers every matched atlas whose warped grayscale is still missing.
pub struct RegistrationScheduler {
    toolkit: Arc<dyn Toolkit>,
    pool: BatchPool,
    params: RegistrationParams,
}

impl RegistrationScheduler {
    pub fn new(toolkit: Arc<dyn Toolkit>, pool: BatchPool) -> Self {
        Self {
            toolkit,
            pool,
            params: RegistrationParams::default(),
        }
    }

    pub fn with_params(mut self, params: RegistrationParams) -> Self {
        self.params = params;
        self
    }

    /// Atlases of `ctx` whose registration has not produced output yet.
    pub fn pending<'a>(&self, ctx: &'a SubjectContext) -> Vec<&'a MatchedAtlas> {
        ctx.matched
            .iter()
            .filter(|m| stage_status(&ctx.layout, Stage::Registration(&m.atlas)).is_pending())
            .collect()
    }

    fn request(&self, ctx: &SubjectContext, matched: &MatchedAtlas) -> RegistrationRequest {
        RegistrationRequest {
            moving: matched.atlas.template_path.clone(),
            fixed: ctx.subject.image_path.clone(),
            output_prefix: ctx.layout.registration_prefix(&matched.atlas),
            params: self.params.clone(),
        }
    }

    /// Run all pending registrations in barrier-separated batches.
    ///
    /// Returns once every job of every batch has exited.
    pub async fn run(&self, ctx: &SubjectContext) -> BatchReport {
        let pending = self.pending(ctx);
        if pending.is_empty() {
            info!(
                subject = %ctx.name(),
                atlases = ctx.matched.len(),
                "all registrations already present"
            );
            return BatchReport::default();
        }

        let requests: Vec<_> = pending.iter().map(|m| self.request(ctx, m)).collect();
        let expected: Vec<_> = pending
            .iter()
            .map(|m| ctx.layout.warped_grayscale(&m.atlas))
            .collect();

        info!(
            subject = %ctx.name(),
            pending = requests.len(),
            batches = self.pool.batch_sizes(requests.len()).len(),
            "registering atlases"
        );

        let toolkit = Arc::clone(&self.toolkit);
        let outcomes = self
            .pool
            .run("registration", requests, move |request| {
                let toolkit = Arc::clone(&toolkit);
                async move { toolkit.register(&request).await }
            })
            .await;

        BatchReport::tally("registration", &outcomes, &expected)
    }
}
