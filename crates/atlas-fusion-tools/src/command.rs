//! Collaborator definitions and command lines.

use std::path::{Path, PathBuf};

use atlas_fusion_core::{
    ArithmeticOp, CorrectionRequest, FusionRequest, Interpolation, RegistrationRequest,
    RelabelRequest, ResampleRequest, ToolkitConfig,
};
use serde::{Deserialize, Serialize};

/// The external tools the pipeline drives.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Collaborator {
    /// Rigid + affine + deformable registration.
    Registrator,

    /// Applies a deformable field and an affine transform.
    Resampler,

    /// Joint label fusion over listed atlas/label pairs.
    LabelFusion,

    /// Partial volume correction.
    VolumeCorrector,

    /// Prints the volume of one label.
    VolumeMeasurer,

    /// Pointwise multiply / add.
    ImageArithmetic,

    /// Label value remapping.
    Relabeler,
}

impl Collaborator {
    pub const ALL: [Collaborator; 7] = [
        Collaborator::Registrator,
        Collaborator::Resampler,
        Collaborator::LabelFusion,
        Collaborator::VolumeCorrector,
        Collaborator::VolumeMeasurer,
        Collaborator::ImageArithmetic,
        Collaborator::Relabeler,
    ];

    /// Get the collaborator name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            Collaborator::Registrator => "registrator",
            Collaborator::Resampler => "resampler",
            Collaborator::LabelFusion => "label_fusion",
            Collaborator::VolumeCorrector => "volume_corrector",
            Collaborator::VolumeMeasurer => "volume_measurer",
            Collaborator::ImageArithmetic => "image_arithmetic",
            Collaborator::Relabeler => "relabeler",
        }
    }

    /// Configured binary name for this collaborator.
    pub fn binary<'a>(&self, config: &'a ToolkitConfig) -> &'a str {
        match self {
            Collaborator::Registrator => &config.registrator,
            Collaborator::Resampler => &config.resampler,
            Collaborator::LabelFusion => &config.label_fusion,
            Collaborator::VolumeCorrector => &config.volume_corrector,
            Collaborator::VolumeMeasurer => &config.volume_measurer,
            Collaborator::ImageArithmetic => &config.image_arithmetic,
            Collaborator::Relabeler => &config.relabeler,
        }
    }
}

impl std::fmt::Display for Collaborator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A fully resolved invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSpec {
    pub collaborator: Collaborator,

    /// Resolved executable.
    pub program: PathBuf,

    pub args: Vec<String>,

    /// Timeout in seconds; 0 waits indefinitely.
    pub timeout_secs: u64,
}

impl CommandSpec {
    pub fn new(collaborator: Collaborator, program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            collaborator,
            program: program.into(),
            args,
            timeout_secs: 0,
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Shell-like rendering for logs.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

fn arg(path: &Path) -> String {
    path.display().to_string()
}

fn join_labels(labels: &[u32]) -> String {
    labels
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// `-d 3 -f <fixed> -m <moving> -o <prefix> -t <transform> -n <threads>`
pub fn registration_args(request: &RegistrationRequest) -> Vec<String> {
    vec![
        "-d".to_string(),
        "3".to_string(),
        "-f".to_string(),
        arg(&request.fixed),
        "-m".to_string(),
        arg(&request.moving),
        "-o".to_string(),
        arg(&request.output_prefix),
        "-t".to_string(),
        request.params.transform.clone(),
        "-n".to_string(),
        request.params.threads.to_string(),
    ]
}

/// `-d 3 -i <src> -o <out> -r <ref> -t <warp> -t <affine> -n <interpolation>`
pub fn resample_args(request: &ResampleRequest) -> Vec<String> {
    let interpolation = match request.interpolation {
        Interpolation::Smooth => "Linear",
        Interpolation::LabelPreserving => "GenericLabel",
    };
    vec![
        "-d".to_string(),
        "3".to_string(),
        "-i".to_string(),
        arg(&request.source),
        "-o".to_string(),
        arg(&request.output),
        "-r".to_string(),
        arg(&request.reference),
        "-t".to_string(),
        arg(&request.deformable_field),
        "-t".to_string(),
        arg(&request.affine_transform),
        "-n".to_string(),
        interpolation.to_string(),
    ]
}

/// `<labelManifest> <target> <atlasManifest> <out> <bx> <by> <bz> <overlap> <threads>`
pub fn fusion_args(request: &FusionRequest) -> Vec<String> {
    vec![
        arg(&request.label_manifest),
        arg(&request.target),
        arg(&request.atlas_manifest),
        arg(&request.output),
        request.blocks.x.to_string(),
        request.blocks.y.to_string(),
        request.blocks.z.to_string(),
        request.blocks.overlap.to_string(),
        request.threads.to_string(),
    ]
}

/// `<target> <seg> <out> <strength>`
pub fn correction_args(request: &CorrectionRequest) -> Vec<String> {
    vec![
        arg(&request.target),
        arg(&request.segmentation),
        arg(&request.output),
        request.strength.to_string(),
    ]
}

/// `<image> <label>`
pub fn measure_args(image: &Path, label: u32) -> Vec<String> {
    vec![arg(image), label.to_string()]
}

/// `3 <out> m|+ <a> <b>`
pub fn arithmetic_args(a: &Path, op: ArithmeticOp, b: &Path, output: &Path) -> Vec<String> {
    let op = match op {
        ArithmeticOp::Multiply => "m",
        ArithmeticOp::Add => "+",
    };
    vec![
        "3".to_string(),
        arg(output),
        op.to_string(),
        arg(a),
        arg(b),
    ]
}

/// `<image> <reference> <out> <from,..> <to,..> <default|keep>`
pub fn relabel_args(request: &RelabelRequest) -> Vec<String> {
    vec![
        arg(&request.image),
        arg(&request.reference),
        arg(&request.output),
        join_labels(&request.from),
        join_labels(&request.to),
        request
            .default_value
            .map_or_else(|| "keep".to_string(), |v| v.to_string()),
    ]
}
