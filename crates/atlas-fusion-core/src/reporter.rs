//! End-of-run reporting.
//!
//! The [`Reporter`] is the only run-scoped accumulator: stages hand it their
//! outcomes, and it renders a plain-text summary listing every failed
//! correction validation plus a machine-readable `<prefix>_report.json`.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::parcellation::ParcellationOutcome;
use crate::pvc::PvcOutcome;
use crate::segmentation::{FusionOutcome, FusionSkip};

/// Why a subject (or one of its schemes) was not processed further.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum SkipReason {
    MissingImage,
    MissingAge,
    NoMatchingAtlases,
    TooFewPairs { pairs: usize },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::MissingImage => write!(f, "subject image not found"),
            SkipReason::MissingAge => write!(f, "no gestational age"),
            SkipReason::NoMatchingAtlases => write!(f, "no atlas within the age window"),
            SkipReason::TooFewPairs { pairs } => {
                write!(f, "only {} usable atlas/label pair(s)", pairs)
            }
        }
    }
}

/// One recorded skip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectSkip {
    pub subject: String,
    pub scheme: Option<String>,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// Fusion result for one subject and scheme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusionRecord {
    pub subject: String,
    pub scheme: String,
    #[serde(flatten)]
    pub outcome: FusionOutcome,
}

/// Serializable record of a whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub subjects: usize,
    pub schemes: Vec<String>,
    pub skips: Vec<SubjectSkip>,
    pub fusions: Vec<FusionRecord>,
    pub corrections: Vec<PvcOutcome>,
    pub parcellations: Vec<ParcellationOutcome>,
}

impl RunReport {
    pub fn pvc_failures(&self) -> impl Iterator<Item = &PvcOutcome> {
        self.corrections.iter().filter(|o| !o.passed())
    }

    pub fn pvc_successes(&self) -> usize {
        self.corrections.iter().filter(|o| o.passed()).count()
    }

    pub fn fusions_created(&self) -> usize {
        self.fusions.iter().filter(|f| f.outcome.created).count()
    }

    pub fn parcellations_created(&self) -> usize {
        self.parcellations.iter().filter(|p| p.created).count()
    }

    /// Plain-text summary.
    pub fn render_summary(&self) -> String {
        let failures: Vec<&PvcOutcome> = self.pvc_failures().collect();
        let mut out = String::new();
        out.push_str(&format!("atlas-fusion run {}\n", self.run_id));
        out.push_str(&format!(
            "subjects: {}  schemes: {}\n",
            self.subjects,
            self.schemes.join(", ")
        ));
        out.push_str(&format!(
            "fused maps: {}/{}  parcellations: {}\n",
            self.fusions_created(),
            self.fusions.len(),
            self.parcellations_created()
        ));
        out.push_str(&format!(
            "PVC validation: {} passed, {} failed\n",
            self.pvc_successes(),
            failures.len()
        ));

        if !self.skips.is_empty() {
            out.push_str("\nSkipped:\n");
            for skip in &self.skips {
                match &skip.scheme {
                    Some(scheme) => out.push_str(&format!(
                        "  {} [{}]: {}\n",
                        skip.subject, scheme, skip.reason
                    )),
                    None => out.push_str(&format!("  {}: {}\n", skip.subject, skip.reason)),
                }
            }
        }

        if failures.is_empty() {
            out.push_str("\nAll partial volume corrections passed validation.\n");
        } else {
            out.push_str("\nPartial volume correction FAILED for:\n");
            for failure in failures {
                let detail = match (failure.reduction_percent, &failure.note) {
                    (Some(r), _) => format!(
                        "CP volume {:.1} -> {:.1} ({:.2}% reduction)",
                        failure.before_volume.unwrap_or_default(),
                        failure.after_volume.unwrap_or_default(),
                        r
                    ),
                    (None, Some(note)) => note.clone(),
                    (None, None) => "not validated".to_string(),
                };
                out.push_str(&format!(
                    "  {} [{}]: {}\n",
                    failure.subject, failure.scheme, detail
                ));
            }
        }
        out
    }
}

/// Accumulates outcomes for the end-of-run summary.
#[derive(Debug, Clone)]
pub struct Reporter {
    report: RunReport,
}

impl Reporter {
    pub fn new(run_id: impl Into<String>, subjects: usize, schemes: Vec<String>) -> Self {
        Self {
            report: RunReport {
                run_id: run_id.into(),
                started_at: Utc::now(),
                finished_at: None,
                subjects,
                schemes,
                skips: Vec::new(),
                fusions: Vec::new(),
                corrections: Vec::new(),
                parcellations: Vec::new(),
            },
        }
    }

    pub fn record_skip(&mut self, subject: &str, scheme: Option<&str>, reason: SkipReason) {
        self.report.skips.push(SubjectSkip {
            subject: subject.to_string(),
            scheme: scheme.map(str::to_string),
            reason,
        });
    }

    pub fn record_fusion(&mut self, subject: &str, scheme: &str, outcome: FusionOutcome) {
        if let Some(FusionSkip::TooFewPairs { pairs }) = outcome.skipped {
            self.record_skip(subject, Some(scheme), SkipReason::TooFewPairs { pairs });
        }
        self.report.fusions.push(FusionRecord {
            subject: subject.to_string(),
            scheme: scheme.to_string(),
            outcome,
        });
    }

    pub fn record_pvc(&mut self, outcome: PvcOutcome) {
        self.report.corrections.push(outcome);
    }

    pub fn record_parcellations(&mut self, outcomes: Vec<ParcellationOutcome>) {
        self.report.parcellations.extend(outcomes);
    }

    pub fn report(&self) -> &RunReport {
        &self.report
    }

    /// Stamp the finish time and hand over the report.
    pub fn finish(mut self) -> RunReport {
        self.report.finished_at = Some(Utc::now());
        self.report
    }
}

/// Write `report` as pretty-printed JSON.
pub fn write_report(report: &RunReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json)?;
    Ok(())
}
