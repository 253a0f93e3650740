//! Cortical plate parcellation.
//!
//! Splits the cortical plate of a corrected tissue map into the regions of
//! the fused regional map:
//!
//! ```text
//! mask       = tissue in cp_labels ? 1 : 0
//! complement = tissue in cp_labels ? 0 : tissue
//! combined   = complement + mask * regional
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::LabelScheme;
use crate::error::Result;
use crate::naming::{is_corrected_tissue_file, SubjectLayout};
use crate::obs;
use crate::status::{stage_status, Stage};
use crate::toolkit::{ArithmeticOp, RelabelRequest, ToolRun, Toolkit};

/// Result of parcellating one corrected tissue map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParcellationOutcome {
    pub subject: String,
    pub corrected_path: PathBuf,
    pub output_path: PathBuf,
    /// Whether the combined output exists after the stage.
    pub created: bool,
    /// Whether the tools were invoked in this run.
    pub invoked: bool,
}

/// Merges corrected tissue maps with the fused regional map.
pub struct Parcellator {
    toolkit: Arc<dyn Toolkit>,
    cp_labels: Vec<u32>,
}

impl Parcellator {
    pub fn new(toolkit: Arc<dyn Toolkit>, cp_labels: Vec<u32>) -> Self {
        Self { toolkit, cp_labels }
    }

    /// Corrected tissue files of the subject, sorted by name.
    pub fn corrected_tissue_files(layout: &SubjectLayout, tissue_suffix: &str) -> Result<Vec<String>> {
        let dir = layout.pvc_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_corrected_tissue_file(&name, tissue_suffix) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Parcellate every corrected tissue map of the subject.
    ///
    /// Requires the corrected tissue map and the fused regional map of this
    /// run; otherwise nothing is done.
    pub async fn run(
        &self,
        layout: &SubjectLayout,
        tissue: &LabelScheme,
        regional: &LabelScheme,
    ) -> Result<Vec<ParcellationOutcome>> {
        let subject = layout.subject_name();
        if stage_status(layout, Stage::Correction(tissue)).is_pending() {
            debug!(subject = %subject, "no corrected tissue map, skipping parcellation");
            return Ok(Vec::new());
        }
        if stage_status(layout, Stage::Fusion(regional)).is_pending() {
            warn!(subject = %subject, scheme = %regional, "no fused regional map, skipping parcellation");
            return Ok(Vec::new());
        }
        let regional_map = layout.fused(regional);

        let mut outcomes = Vec::new();
        for name in Self::corrected_tissue_files(layout, &tissue.suffix)? {
            let Some(output_path) = layout.parcellated(&name) else {
                continue;
            };
            let corrected_path = layout.pvc_dir().join(&name);

            if stage_status(layout, Stage::Parcellation(&name)).is_done() {
                obs::emit_stage_skipped("parcellation", &output_path);
                outcomes.push(ParcellationOutcome {
                    subject: subject.to_string(),
                    corrected_path,
                    output_path,
                    created: true,
                    invoked: false,
                });
                continue;
            }

            info!(subject = %subject, tissue = %name, "parcellating cortical plate");
            let temporaries = layout.parcellation_temporaries(&name);
            self.combine(&corrected_path, &regional_map, &output_path, &temporaries)
                .await;
            remove_temporaries(&temporaries);

            let created = output_path.exists();
            if !created {
                warn!(subject = %subject, output = %output_path.display(), "parcellation output missing");
            }
            outcomes.push(ParcellationOutcome {
                subject: subject.to_string(),
                corrected_path,
                output_path,
                created,
                invoked: true,
            });
        }
        Ok(outcomes)
    }

    async fn combine(
        &self,
        tissue: &Path,
        regional: &Path,
        output: &Path,
        (mask, complement, product): &(PathBuf, PathBuf, PathBuf),
    ) {
        let mask_request = RelabelRequest {
            image: tissue.to_path_buf(),
            reference: tissue.to_path_buf(),
            from: self.cp_labels.clone(),
            to: vec![1; self.cp_labels.len()],
            output: mask.clone(),
            default_value: Some(0),
        };
        if !step("cp_mask", self.toolkit.relabel(&mask_request).await, mask) {
            return;
        }

        let complement_request = RelabelRequest {
            image: tissue.to_path_buf(),
            reference: tissue.to_path_buf(),
            from: self.cp_labels.clone(),
            to: vec![0; self.cp_labels.len()],
            output: complement.clone(),
            default_value: None,
        };
        if !step(
            "non_cp",
            self.toolkit.relabel(&complement_request).await,
            complement,
        ) {
            return;
        }

        let multiplied = self
            .toolkit
            .image_arithmetic(mask, ArithmeticOp::Multiply, regional, product)
            .await;
        if !step("cp_regions", multiplied, product) {
            return;
        }

        let added = self
            .toolkit
            .image_arithmetic(complement, ArithmeticOp::Add, product, output)
            .await;
        step("combine", added, output);
    }
}

/// Whether a parcellation step left its output behind.
fn step(name: &str, run: Result<ToolRun>, output: &Path) -> bool {
    match run {
        Ok(run) if !run.passed() => {
            debug!(step = name, tool = %run.tool, exit_code = run.exit_code, "step exited with failure");
        }
        Ok(_) => {}
        Err(e) => warn!(step = name, error = %e, "step could not be run"),
    }
    if output.exists() {
        true
    } else {
        warn!(step = name, output = %output.display(), "parcellation step produced no output");
        false
    }
}

fn remove_temporaries((mask, complement, product): &(PathBuf, PathBuf, PathBuf)) {
    for path in [mask, complement, product] {
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "could not remove temporary"),
        }
    }
}
