//! External collaborator interface.
//!
//! The image processing itself (registration, resampling, fusion, volume
//! correction, measurement, arithmetic, relabeling) is done by external
//! tools. Stages talk to them only through [`Toolkit`], so tests can inject
//! [`crate::fakes::VoxelToolkit`] and production wires in the process-backed
//! implementation from `atlas-fusion-tools`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::FusionBlocks;
use crate::error::Result;

/// Resampling interpolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    /// Smooth interpolation for grayscale images.
    Smooth,
    /// Nearest-neighbour equivalent, never invents label values.
    LabelPreserving,
}

/// Elementwise image operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithmeticOp {
    Multiply,
    Add,
}

/// Registration tuning passed through to the registrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationParams {
    /// Transform model, `s` for rigid + affine + deformable.
    pub transform: String,
    /// Threads per registration job.
    pub threads: usize,
}

impl Default for RegistrationParams {
    fn default() -> Self {
        Self {
            transform: "s".to_string(),
            threads: 1,
        }
    }
}

/// Register `moving` onto `fixed`.
///
/// Expected outputs are `<prefix>0GenericAffine.mat`, `<prefix>1Warp.nii.gz`
/// and `<prefix>Warped.nii.gz`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub moving: PathBuf,
    pub fixed: PathBuf,
    pub output_prefix: PathBuf,
    pub params: RegistrationParams,
}

/// Resample `source` into the space of `reference`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResampleRequest {
    pub source: PathBuf,
    pub output: PathBuf,
    pub reference: PathBuf,
    pub deformable_field: PathBuf,
    pub affine_transform: PathBuf,
    pub interpolation: Interpolation,
}

/// Fuse warped labels listed in `label_manifest` onto `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusionRequest {
    pub label_manifest: PathBuf,
    pub target: PathBuf,
    pub atlas_manifest: PathBuf,
    pub output: PathBuf,
    pub blocks: FusionBlocks,
    pub threads: usize,
}

/// Partial volume correction of `segmentation` against `target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionRequest {
    pub target: PathBuf,
    pub segmentation: PathBuf,
    pub output: PathBuf,
    pub strength: f64,
}

/// Map `from[i]` to `to[i]`; every other voxel becomes `default_value`,
/// or keeps its value when `default_value` is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelabelRequest {
    pub image: PathBuf,
    pub reference: PathBuf,
    pub from: Vec<u32>,
    pub to: Vec<u32>,
    pub output: PathBuf,
    pub default_value: Option<u32>,
}

/// Exit record of one collaborator invocation.
///
/// Stages do not act on the exit status; the presence of the expected output
/// decides what happens next. It is kept so a stricter mode can.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRun {
    pub tool: String,
    pub exit_code: i32,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl ToolRun {
    pub fn ok(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            exit_code: 0,
            success: true,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
        }
    }

    pub fn failed(tool: impl Into<String>, exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            exit_code,
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
            duration_ms: 0,
        }
    }

    /// Whether the process exited with status 0.
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }
}

/// The external collaborators.
///
/// `Err` means the tool could not be run at all (spawn failure, timeout);
/// a tool that ran and failed returns `Ok` with a failing [`ToolRun`].
#[async_trait]
pub trait Toolkit: Send + Sync {
    async fn register(&self, request: &RegistrationRequest) -> Result<ToolRun>;

    async fn resample(&self, request: &ResampleRequest) -> Result<ToolRun>;

    async fn fuse_labels(&self, request: &FusionRequest) -> Result<ToolRun>;

    async fn correct_volume(&self, request: &CorrectionRequest) -> Result<ToolRun>;

    /// Volume of `label` in `image`.
    async fn measure_volume(&self, image: &Path, label: u32) -> Result<f64>;

    async fn image_arithmetic(
        &self,
        a: &Path,
        op: ArithmeticOp,
        b: &Path,
        output: &Path,
    ) -> Result<ToolRun>;

    async fn relabel(&self, request: &RelabelRequest) -> Result<ToolRun>;
}
