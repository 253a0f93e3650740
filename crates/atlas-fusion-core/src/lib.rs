//! atlas-fusion core library
//!
//! Orchestrates multi-atlas segmentation of fetal brain images: age-matched
//! atlas selection, batched registration and resampling, label fusion,
//! partial volume correction with validation, and cortical plate
//! parcellation. The image processing itself is delegated to external tools
//! behind the [`Toolkit`] trait.

pub mod config;
pub mod context;
pub mod domain;
pub mod error;
pub mod fakes;
pub mod manifest;
pub mod naming;
pub mod obs;
pub mod parcellation;
pub mod pipeline;
pub mod pool;
pub mod pvc;
pub mod registration;
pub mod reporter;
pub mod segmentation;
pub mod selector;
pub mod status;
pub mod telemetry;
pub mod toolkit;
pub mod transform;

pub use config::{
    parse_label_list, parse_max_threads, validate_output_prefix, FusionBlocks, PipelineConfig,
    ToolkitConfig,
};
pub use context::SubjectContext;
pub use domain::{AtlasEntry, AtlasLibrary, LabelScheme, Subject, SubjectManifest};
pub use error::{AtlasFusionError, Result};
pub use manifest::{assemble_and_write, AtlasLabelManifest};
pub use naming::SubjectLayout;
pub use parcellation::{ParcellationOutcome, Parcellator};
pub use pipeline::Pipeline;
pub use pool::{BatchPool, BatchReport, JobOutcome};
pub use pvc::{PvcOutcome, PvcValidator, PvcVerdict};
pub use registration::RegistrationScheduler;
pub use reporter::{write_report, Reporter, RunReport, SkipReason, SubjectSkip};
pub use segmentation::{FusionOutcome, FusionSkip, SegmentationRunner, MIN_FUSION_PAIRS};
pub use selector::{select_atlases, within_age_window, MatchedAtlas, AGE_WINDOW};
pub use status::{stage_status, Stage, StageStatus};
pub use telemetry::init_tracing;
pub use toolkit::{
    ArithmeticOp, CorrectionRequest, FusionRequest, Interpolation, RegistrationParams,
    RegistrationRequest, RelabelRequest, ResampleRequest, ToolRun, Toolkit,
};
pub use transform::{TransformApplier, TransformReport};
