//! Partial volume correction and its validation.
//!
//! Correction is computed once; validation runs on every pass, including
//! against a correction left by an earlier run. A correction passes when the
//! monitored cortical plate label loses more than the configured share of
//! its volume.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::{LabelScheme, Subject};
use crate::naming::SubjectLayout;
use crate::obs;
use crate::status::{stage_status, Stage};
use crate::toolkit::{CorrectionRequest, Toolkit};

/// Validation verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PvcVerdict {
    Success,
    Failure,
}

/// Result of correcting and validating one subject's tissue map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PvcOutcome {
    pub subject: String,
    pub scheme: String,
    pub output_path: PathBuf,
    pub before_volume: Option<f64>,
    pub after_volume: Option<f64>,
    pub reduction_percent: Option<f64>,
    pub verdict: PvcVerdict,
    /// Whether correction was computed in this run rather than reused.
    pub computed: bool,
    /// Extra detail when validation could not be carried out.
    pub note: Option<String>,
}

impl PvcOutcome {
    pub fn passed(&self) -> bool {
        self.verdict == PvcVerdict::Success
    }
}

/// `100 * (1 - after / before)`, undefined when `before` is not positive.
pub fn reduction_percent(before: f64, after: f64) -> Option<f64> {
    if before > 0.0 && before.is_finite() && after.is_finite() {
        Some(100.0 * (1.0 - after / before))
    } else {
        None
    }
}

/// Success iff the reduction strictly exceeds `threshold_percent`.
pub fn verdict_for(reduction: f64, threshold_percent: f64) -> PvcVerdict {
    if reduction > threshold_percent {
        PvcVerdict::Success
    } else {
        PvcVerdict::Failure
    }
}

/// Runs the volume corrector on a fused tissue map and checks its effect.
pub struct PvcValidator {
    toolkit: Arc<dyn Toolkit>,
    monitored_label: u32,
    strength: f64,
    threshold_percent: f64,
}

impl PvcValidator {
    pub fn new(
        toolkit: Arc<dyn Toolkit>,
        monitored_label: u32,
        strength: f64,
        threshold_percent: f64,
    ) -> Self {
        Self {
            toolkit,
            monitored_label,
            strength,
            threshold_percent,
        }
    }

    /// Correct (if needed) and validate. `None` when there is no fused map to correct.
    pub async fn run(
        &self,
        subject: &Subject,
        layout: &SubjectLayout,
        scheme: &LabelScheme,
    ) -> Option<PvcOutcome> {
        let fused = layout.fused(scheme);
        if stage_status(layout, Stage::Fusion(scheme)).is_pending() {
            warn!(
                subject = %subject.name,
                scheme = %scheme,
                "no fused tissue map, skipping volume correction"
            );
            return None;
        }

        let output_path = layout.corrected(scheme);
        let computed = if stage_status(layout, Stage::Correction(scheme)).is_done() {
            obs::emit_stage_skipped("correction", &output_path);
            false
        } else {
            info!(subject = %subject.name, strength = self.strength, "running partial volume correction");
            let request = CorrectionRequest {
                target: subject.image_path.clone(),
                segmentation: fused.clone(),
                output: output_path.clone(),
                strength: self.strength,
            };
            match self.toolkit.correct_volume(&request).await {
                Ok(run) if !run.passed() => {
                    warn!(subject = %subject.name, exit_code = run.exit_code, "volume correction exited with failure");
                }
                Ok(_) => {}
                Err(e) => warn!(subject = %subject.name, error = %e, "volume correction could not be run"),
            }
            true
        };

        let mut outcome = PvcOutcome {
            subject: subject.name.clone(),
            scheme: scheme.suffix.clone(),
            output_path: output_path.clone(),
            before_volume: None,
            after_volume: None,
            reduction_percent: None,
            verdict: PvcVerdict::Failure,
            computed,
            note: None,
        };

        if !output_path.exists() {
            outcome.note = Some("correction produced no output".to_string());
            warn!(subject = %subject.name, output = %output_path.display(), "corrected map missing");
            return Some(outcome);
        }

        self.validate(&fused, &output_path, &mut outcome).await;
        Some(outcome)
    }

    async fn validate(&self, before_path: &Path, after_path: &Path, outcome: &mut PvcOutcome) {
        let before = match self.toolkit.measure_volume(before_path, self.monitored_label).await {
            Ok(v) => v,
            Err(e) => {
                outcome.note = Some(format!("could not measure fused volume: {}", e));
                warn!(subject = %outcome.subject, error = %e, "volume measurement failed");
                return;
            }
        };
        outcome.before_volume = Some(before);

        let after = match self.toolkit.measure_volume(after_path, self.monitored_label).await {
            Ok(v) => v,
            Err(e) => {
                outcome.note = Some(format!("could not measure corrected volume: {}", e));
                warn!(subject = %outcome.subject, error = %e, "volume measurement failed");
                return;
            }
        };
        outcome.after_volume = Some(after);

        match reduction_percent(before, after) {
            Some(reduction) => {
                outcome.reduction_percent = Some(reduction);
                outcome.verdict = verdict_for(reduction, self.threshold_percent);
                obs::emit_pvc_validated(&outcome.subject, before, after, reduction, outcome.passed());
                if !outcome.passed() {
                    warn!(
                        subject = %outcome.subject,
                        label = self.monitored_label,
                        reduction_percent = reduction,
                        threshold_percent = self.threshold_percent,
                        "partial volume correction had too little effect"
                    );
                }
            }
            None => {
                outcome.note = Some(format!(
                    "label {} has no volume before correction",
                    self.monitored_label
                ));
                warn!(subject = %outcome.subject, label = self.monitored_label, "monitored label is empty");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduction_percent() {
        let r = reduction_percent(100.0, 96.0).unwrap();
        assert!((r - 4.0).abs() < 1e-9);
        let r = reduction_percent(100.0, 99.0).unwrap();
        assert!((r - 1.0).abs() < 1e-9);
        assert!(reduction_percent(0.0, 10.0).is_none());
    }

    #[test]
    fn test_verdict_threshold_is_strict() {
        assert_eq!(verdict_for(4.0, 2.0), PvcVerdict::Success);
        assert_eq!(verdict_for(1.0, 2.0), PvcVerdict::Failure);
        assert_eq!(verdict_for(2.0, 2.0), PvcVerdict::Failure);
        assert_eq!(verdict_for(-3.0, 2.0), PvcVerdict::Failure);
    }
}
