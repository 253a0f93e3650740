//! Run configuration.
//!
//! One immutable [`PipelineConfig`] is built at startup from environment
//! defaults plus command-line overrides, validated, and then passed by
//! reference to every stage.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::LabelScheme;
use crate::error::{AtlasFusionError, Result};

/// Spatial block partition handed to the label fusion collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusionBlocks {
    pub x: u32,
    pub y: u32,
    pub z: u32,
    /// Overlap between neighbouring blocks, in voxels.
    pub overlap: u32,
}

impl Default for FusionBlocks {
    fn default() -> Self {
        Self {
            x: 3,
            y: 3,
            z: 3,
            overlap: 2,
        }
    }
}

/// Binary names of the external collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolkitConfig {
    /// Toolkit installation root. Binaries are looked up in `<root>/bin`,
    /// then `<root>`, then `PATH`.
    pub root: Option<PathBuf>,

    pub registrator: String,
    pub resampler: String,
    pub label_fusion: String,
    pub volume_corrector: String,
    pub volume_measurer: String,
    pub image_arithmetic: String,
    pub relabeler: String,

    /// Per-invocation timeout in seconds; 0 waits indefinitely.
    pub timeout_secs: u64,
}

impl Default for ToolkitConfig {
    fn default() -> Self {
        Self {
            root: None,
            registrator: "antsRegistrationSyN.sh".to_string(),
            resampler: "antsApplyTransforms".to_string(),
            label_fusion: "antsJointFusionManifest".to_string(),
            volume_corrector: "pvc_correct".to_string(),
            volume_measurer: "LabelVolume".to_string(),
            image_arithmetic: "ImageMath".to_string(),
            relabeler: "relabel".to_string(),
            timeout_secs: 0,
        }
    }
}

impl ToolkitConfig {
    /// Every binary the pipeline may invoke, in invocation order.
    pub fn binaries(&self) -> Vec<&str> {
        vec![
            self.registrator.as_str(),
            self.resampler.as_str(),
            self.label_fusion.as_str(),
            self.volume_corrector.as_str(),
            self.volume_measurer.as_str(),
            self.image_arithmetic.as_str(),
            self.relabeler.as_str(),
        ]
    }
}

/// Immutable configuration for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub atlas_root: PathBuf,
    pub atlas_manifest: PathBuf,
    pub toolkit: ToolkitConfig,

    /// Label scheme suffixes, processed in order.
    pub label_suffixes: Vec<String>,
    pub output_prefix: String,
    pub output_dir: PathBuf,

    /// Suffix of the scheme whose fused output is partial-volume corrected.
    pub tissue_suffix: String,
    /// Suffix of the scheme that provides cortical sub-regions.
    pub regional_suffix: String,

    /// Cortical plate labels in the tissue map.
    pub cp_labels: Vec<u32>,
    /// Label whose volume must shrink after correction.
    pub pvc_label: u32,
    pub pvc_strength: f64,
    /// Minimum volume reduction, in percent, for a correction to pass.
    pub pvc_threshold_percent: f64,

    pub fusion_blocks: FusionBlocks,

    /// Maximum number of concurrently running collaborator processes.
    pub max_threads: usize,

    pub run_segmentation: bool,
    pub run_pvc: bool,
}

pub const ENV_ATLAS_ROOT: &str = "ATLAS_FUSION_ATLAS_ROOT";
pub const ENV_ATLAS_MANIFEST: &str = "ATLAS_FUSION_ATLAS_MANIFEST";
pub const ENV_TOOLKIT_ROOT: &str = "ATLAS_FUSION_TOOLKIT_ROOT";
pub const ENV_SCHEMES: &str = "ATLAS_FUSION_SCHEMES";
pub const ENV_TISSUE_SCHEME: &str = "ATLAS_FUSION_TISSUE_SCHEME";
pub const ENV_REGIONAL_SCHEME: &str = "ATLAS_FUSION_REGIONAL_SCHEME";
pub const ENV_CP_LABELS: &str = "ATLAS_FUSION_CP_LABELS";
pub const ENV_PVC_LABEL: &str = "ATLAS_FUSION_PVC_LABEL";
pub const ENV_RUN_SEGMENTATION: &str = "ATLAS_FUSION_RUN_SEGMENTATION";
pub const ENV_RUN_PVC: &str = "ATLAS_FUSION_RUN_PVC";

const DEFAULT_ATLAS_ROOT: &str = "/opt/atlas-fusion/atlases";
const DEFAULT_MANIFEST_NAME: &str = "atlases.txt";

impl Default for PipelineConfig {
    fn default() -> Self {
        let atlas_root = PathBuf::from(DEFAULT_ATLAS_ROOT);
        Self {
            atlas_manifest: atlas_root.join(DEFAULT_MANIFEST_NAME),
            atlas_root,
            toolkit: ToolkitConfig::default(),
            label_suffixes: vec![
                "tissue".to_string(),
                "tissue_subplate".to_string(),
                "regional".to_string(),
            ],
            output_prefix: "mas".to_string(),
            output_dir: PathBuf::from("."),
            tissue_suffix: "tissue".to_string(),
            regional_suffix: "regional".to_string(),
            cp_labels: vec![112, 113],
            pvc_label: 112,
            pvc_strength: 0.5,
            pvc_threshold_percent: 2.0,
            fusion_blocks: FusionBlocks::default(),
            max_threads: 1,
            run_segmentation: true,
            run_pvc: true,
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `ATLAS_FUSION_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env`] with an injectable variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(root) = lookup(ENV_ATLAS_ROOT) {
            config.atlas_root = PathBuf::from(root);
            config.atlas_manifest = config.atlas_root.join(DEFAULT_MANIFEST_NAME);
        }
        if let Some(manifest) = lookup(ENV_ATLAS_MANIFEST) {
            config.atlas_manifest = PathBuf::from(manifest);
        }
        if let Some(root) = lookup(ENV_TOOLKIT_ROOT) {
            config.toolkit.root = Some(PathBuf::from(root));
        }
        if let Some(schemes) = lookup(ENV_SCHEMES) {
            config.label_suffixes = parse_label_list(&schemes);
        }
        if let Some(tissue) = lookup(ENV_TISSUE_SCHEME) {
            config.tissue_suffix = tissue.trim().to_string();
        }
        if let Some(regional) = lookup(ENV_REGIONAL_SCHEME) {
            config.regional_suffix = regional.trim().to_string();
        }
        if let Some(labels) = lookup(ENV_CP_LABELS) {
            config.cp_labels = parse_label_ids(ENV_CP_LABELS, &labels)?;
        }
        if let Some(label) = lookup(ENV_PVC_LABEL) {
            config.pvc_label = label.trim().parse().map_err(|_| {
                AtlasFusionError::InvalidConfig(format!("{ENV_PVC_LABEL}='{label}' is not a label id"))
            })?;
        }
        if let Some(flag) = lookup(ENV_RUN_SEGMENTATION) {
            config.run_segmentation = parse_switch(ENV_RUN_SEGMENTATION, &flag)?;
        }
        if let Some(flag) = lookup(ENV_RUN_PVC) {
            config.run_pvc = parse_switch(ENV_RUN_PVC, &flag)?;
        }

        Ok(config)
    }

    pub fn with_atlas_manifest(mut self, manifest: impl Into<PathBuf>) -> Self {
        self.atlas_manifest = manifest.into();
        self
    }

    pub fn with_label_suffixes(mut self, suffixes: Vec<String>) -> Self {
        self.label_suffixes = suffixes;
        self
    }

    pub fn with_output_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.output_prefix = prefix.into();
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        validate_output_prefix(&self.output_prefix)?;
        if self.max_threads == 0 {
            return Err(AtlasFusionError::InvalidArgument(
                "maxThreads must be a positive integer".to_string(),
            ));
        }
        if self.label_suffixes.is_empty() {
            return Err(AtlasFusionError::InvalidConfig(
                "at least one label scheme is required".to_string(),
            ));
        }
        for suffix in &self.label_suffixes {
            if suffix.is_empty() || suffix.contains(['/', '\\']) || suffix.contains(char::is_whitespace) {
                return Err(AtlasFusionError::InvalidConfig(format!(
                    "invalid label scheme suffix '{}'",
                    suffix
                )));
            }
        }
        if self.cp_labels.is_empty() {
            return Err(AtlasFusionError::InvalidConfig(
                "at least one cortical plate label is required".to_string(),
            ));
        }
        Ok(())
    }

    /// Label schemes in processing order.
    pub fn schemes(&self) -> Vec<LabelScheme> {
        self.label_suffixes
            .iter()
            .map(|s| LabelScheme::new(s.clone(), self.output_prefix.clone()))
            .collect()
    }

    pub fn is_tissue(&self, scheme: &LabelScheme) -> bool {
        scheme.suffix == self.tissue_suffix
    }

    pub fn tissue_scheme(&self) -> LabelScheme {
        LabelScheme::new(self.tissue_suffix.clone(), self.output_prefix.clone())
    }

    pub fn regional_scheme(&self) -> LabelScheme {
        LabelScheme::new(self.regional_suffix.clone(), self.output_prefix.clone())
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

/// Output prefixes become file name components and must not contain separators.
pub fn validate_output_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        return Err(AtlasFusionError::InvalidArgument(
            "output prefix must not be empty".to_string(),
        ));
    }
    if prefix.contains(['/', '\\']) {
        return Err(AtlasFusionError::InvalidArgument(format!(
            "output prefix '{}' must not contain path separators",
            prefix
        )));
    }
    Ok(())
}

/// Parse the `maxThreads` positional argument.
pub fn parse_max_threads(raw: &str) -> Result<usize> {
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(AtlasFusionError::InvalidArgument(format!(
            "maxThreads must be a positive integer, got '{}'",
            raw
        ))),
    }
}

/// Split a comma or whitespace separated list of scheme suffixes.
pub fn parse_label_list(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_label_ids(key: &str, raw: &str) -> Result<Vec<u32>> {
    parse_label_list(raw)
        .iter()
        .map(|s| {
            s.parse::<u32>().map_err(|_| {
                AtlasFusionError::InvalidConfig(format!("{key}: '{s}' is not a label id"))
            })
        })
        .collect()
}

fn parse_switch(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AtlasFusionError::InvalidConfig(format!(
            "{key}='{raw}' is not a switch value"
        ))),
    }
}
