//! Pipeline driver.
//!
//! Order of work:
//!
//! 1. For each label scheme, for each subject: select atlases, register,
//!    resample grayscale then labels, write the fusion manifest.
//! 2. Once every subject has been through step 1 for the scheme: fuse each
//!    subject's labels and, for the tissue scheme, correct and validate.
//! 3. After the last scheme: parcellate each subject and report.
//!
//! Subjects are processed one after the other; only the jobs of one subject
//! run concurrently, bounded by the configured thread budget.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::context::SubjectContext;
use crate::domain::{duplicate_subject_names, AtlasLibrary, LabelScheme, Subject, SubjectManifest};
use crate::error::Result;
use crate::manifest::{assemble_and_write, AtlasLabelManifest};
use crate::naming::SubjectLayout;
use crate::obs;
use crate::parcellation::Parcellator;
use crate::pool::BatchPool;
use crate::pvc::PvcValidator;
use crate::registration::RegistrationScheduler;
use crate::reporter::{write_report, Reporter, RunReport, SkipReason};
use crate::segmentation::SegmentationRunner;
use crate::selector::select_atlases;
use crate::toolkit::Toolkit;
use crate::transform::TransformApplier;

/// A configured run over one subject manifest.
pub struct Pipeline {
    config: Arc<PipelineConfig>,
    toolkit: Arc<dyn Toolkit>,
    atlases: AtlasLibrary,
    subjects: SubjectManifest,
    invocation: String,
}

impl Pipeline {
    pub fn new(
        config: Arc<PipelineConfig>,
        toolkit: Arc<dyn Toolkit>,
        atlases: AtlasLibrary,
        subjects: SubjectManifest,
    ) -> Self {
        Self {
            config,
            toolkit,
            atlases,
            subjects,
            invocation: String::new(),
        }
    }

    /// Command line recorded in each subject's `log/command.txt`.
    pub fn with_invocation(mut self, invocation: impl Into<String>) -> Self {
        self.invocation = invocation.into();
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage for every subject and return the run report.
    ///
    /// The report is also written to `<outputDir>/<prefix>_report.json`.
    pub async fn run(&self) -> Result<RunReport> {
        let run_id = Uuid::new_v4().to_string();
        let span = obs::run_span(&run_id);
        self.run_with_id(run_id).instrument(span).await
    }

    async fn run_with_id(&self, run_id: String) -> Result<RunReport> {
        let schemes = self.config.schemes();
        info!(
            subjects = self.subjects.len(),
            atlases = self.atlases.len(),
            schemes = schemes.len(),
            max_threads = self.config.max_threads,
            "starting atlas fusion run"
        );

        for name in duplicate_subject_names(&self.subjects.subjects) {
            warn!(subject = %name, "subject name occurs more than once; outputs will collide");
        }

        std::fs::create_dir_all(&self.config.output_dir)?;
        let mut reporter = Reporter::new(
            run_id,
            self.subjects.len(),
            schemes.iter().map(|s| s.suffix.clone()).collect(),
        );

        for scheme in &schemes {
            let prepared = self.register_scheme(scheme, &mut reporter).await?;
            self.segment_scheme(scheme, &prepared, &mut reporter).await?;
        }

        self.parcellate_all(&mut reporter).await?;

        let report = reporter.finish();
        let report_path = self
            .config
            .output_dir
            .join(format!("{}_report.json", self.config.output_prefix));
        write_report(&report, &report_path)?;
        info!(report = %report_path.display(), "run complete");
        Ok(report)
    }

    /// Registration, resampling and manifest stages of one scheme for every subject.
    ///
    /// Returns the subjects that reached the manifest stage.
    async fn register_scheme(
        &self,
        scheme: &LabelScheme,
        reporter: &mut Reporter,
    ) -> Result<Vec<Subject>> {
        let pool = BatchPool::new(self.config.max_threads);
        let registration = RegistrationScheduler::new(Arc::clone(&self.toolkit), pool);
        let transforms = TransformApplier::new(Arc::clone(&self.toolkit), pool);

        let mut prepared = Vec::new();
        for subject in self.subjects.iter() {
            let span = obs::subject_span(&subject.name, &scheme.suffix);
            let Some(ctx) = span.in_scope(|| self.prepare(subject, scheme, reporter))? else {
                continue;
            };
            Self::register_subject(&ctx, &registration, &transforms)
                .instrument(span)
                .await?;
            prepared.push(ctx.subject);
        }
        Ok(prepared)
    }

    async fn register_subject(
        ctx: &SubjectContext,
        registration: &RegistrationScheduler,
        transforms: &TransformApplier,
    ) -> Result<AtlasLabelManifest> {
        let registered = registration.run(ctx).await;
        let warped = transforms.run(ctx).await;
        let manifest = assemble_and_write(ctx)?;
        info!(
            registered = registered.issued,
            grayscale_resampled = warped.grayscale.issued,
            labels_resampled = warped.labels.issued,
            pairs = manifest.len(),
            "subject registered"
        );
        Ok(manifest)
    }

    /// Validate inputs, match atlases and lay out the working area.
    fn prepare(
        &self,
        subject: &Subject,
        scheme: &LabelScheme,
        reporter: &mut Reporter,
    ) -> Result<Option<SubjectContext>> {
        if !subject.image_path.is_file() {
            warn!(image = %subject.image_path.display(), "subject image not found, skipping");
            reporter.record_skip(&subject.name, Some(&scheme.suffix), SkipReason::MissingImage);
            return Ok(None);
        }
        let Some(age) = subject.gestational_age else {
            warn!("no gestational age for subject, skipping");
            reporter.record_skip(&subject.name, Some(&scheme.suffix), SkipReason::MissingAge);
            return Ok(None);
        };

        let matched = select_atlases(&self.atlases, &subject.name, age, scheme)?;
        if matched.is_empty() {
            warn!(age = age, "no atlas within the age window, skipping scheme");
            reporter.record_skip(
                &subject.name,
                Some(&scheme.suffix),
                SkipReason::NoMatchingAtlases,
            );
            return Ok(None);
        }
        info!(age = age, matched = matched.len(), "atlases selected");

        let layout = SubjectLayout::new(&self.config.output_dir, subject);
        layout.create_all()?;
        std::fs::write(layout.input_echo(), format!("{}\n", subject.source_line))?;
        if !self.invocation.is_empty() {
            std::fs::write(layout.reproduction_command(), format!("{}\n", self.invocation))?;
        }

        Ok(Some(SubjectContext::new(
            subject.clone(),
            age,
            scheme.clone(),
            layout,
            matched,
        )))
    }

    /// Fusion and, for the tissue scheme, volume correction. Each has its own switch.
    async fn segment_scheme(
        &self,
        scheme: &LabelScheme,
        prepared: &[Subject],
        reporter: &mut Reporter,
    ) -> Result<()> {
        let fuse = self.config.run_segmentation;
        let correct = self.config.run_pvc && self.config.is_tissue(scheme);
        if !fuse {
            info!(scheme = %scheme, "segmentation disabled");
        }
        if !fuse && !correct {
            return Ok(());
        }

        let segmentation = SegmentationRunner::new(
            Arc::clone(&self.toolkit),
            self.config.fusion_blocks,
            self.config.max_threads,
        );
        let validator = PvcValidator::new(
            Arc::clone(&self.toolkit),
            self.config.pvc_label,
            self.config.pvc_strength,
            self.config.pvc_threshold_percent,
        );

        for subject in prepared {
            let span = obs::subject_span(&subject.name, &scheme.suffix);
            let layout = SubjectLayout::new(&self.config.output_dir, subject);
            if fuse {
                let fusion = segmentation
                    .run(subject, &layout, scheme)
                    .instrument(span.clone())
                    .await?;
                reporter.record_fusion(&subject.name, &scheme.suffix, fusion);
            }

            if correct {
                if let Some(outcome) = validator
                    .run(subject, &layout, scheme)
                    .instrument(span)
                    .await
                {
                    reporter.record_pvc(outcome);
                }
            }
        }
        Ok(())
    }

    async fn parcellate_all(&self, reporter: &mut Reporter) -> Result<()> {
        let parcellator = Parcellator::new(Arc::clone(&self.toolkit), self.config.cp_labels.clone());
        let tissue = self.config.tissue_scheme();
        let regional = self.config.regional_scheme();

        let mut seen = HashSet::new();
        for subject in self.subjects.iter() {
            if !seen.insert(subject.name.as_str()) {
                continue;
            }
            let layout = SubjectLayout::new(&self.config.output_dir, subject);
            if !layout.root().is_dir() {
                continue;
            }
            let outcomes = parcellator
                .run(&layout, &tissue, &regional)
                .instrument(obs::subject_span(&subject.name, "parcellation"))
                .await?;
            reporter.record_parcellations(outcomes);
        }
        Ok(())
    }
}
