//! Label schemes.

use serde::{Deserialize, Serialize};

/// One labeling taxonomy, processed as an independent pipeline pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabelScheme {
    /// Label file suffix, e.g. `tissue` for `t2w_GA30_tissue.nii.gz`.
    pub suffix: String,

    /// Prefix applied to every output produced for this scheme.
    pub output_prefix: String,
}

impl LabelScheme {
    pub fn new(suffix: impl Into<String>, output_prefix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
            output_prefix: output_prefix.into(),
        }
    }

    /// `<prefix>_<suffix>`, the stem shared by this scheme's outputs.
    pub fn tag(&self) -> String {
        format!("{}_{}", self.output_prefix, self.suffix)
    }
}

impl std::fmt::Display for LabelScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.suffix)
    }
}
