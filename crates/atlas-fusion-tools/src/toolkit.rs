//! [`Toolkit`] backed by child processes.

use std::path::Path;

use async_trait::async_trait;
use atlas_fusion_core::{
    ArithmeticOp, AtlasFusionError, CorrectionRequest, FusionRequest, RegistrationRequest,
    RelabelRequest, ResampleRequest, Result, ToolRun, Toolkit, ToolkitConfig,
};
use tracing::{debug, warn};

use crate::command::{self, Collaborator, CommandSpec};
use crate::deps::{check_dependencies, ResolvedBinaries};
use crate::runner::CommandRunner;

/// Last token of `stdout` that parses as a finite number.
///
/// The measurer may echo the label id before the volume, so the volume is
/// taken from the end of its output.
pub fn parse_volume(stdout: &str) -> Option<f64> {
    stdout
        .split(|c: char| c.is_whitespace() || c == ',' || c == ';' || c == ':')
        .filter_map(|token| token.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .last()
}

/// Runs the resolved collaborator binaries.
#[derive(Debug, Clone)]
pub struct ProcessToolkit {
    binaries: ResolvedBinaries,
    timeout_secs: u64,
}

impl ProcessToolkit {
    pub fn new(binaries: ResolvedBinaries, timeout_secs: u64) -> Self {
        Self {
            binaries,
            timeout_secs,
        }
    }

    /// Resolve every binary named by `config`; fails if any is missing.
    pub fn from_config(config: &ToolkitConfig) -> Result<Self> {
        Ok(Self::new(check_dependencies(config)?, config.timeout_secs))
    }

    fn spec(&self, collaborator: Collaborator, args: Vec<String>) -> Result<CommandSpec> {
        let program = self.binaries.program(collaborator).ok_or_else(|| {
            AtlasFusionError::MissingDependency {
                tools: vec![collaborator.name().to_string()],
            }
        })?;
        Ok(CommandSpec::new(collaborator, program, args).with_timeout(self.timeout_secs))
    }

    async fn invoke(&self, collaborator: Collaborator, args: Vec<String>) -> Result<ToolRun> {
        let spec = self.spec(collaborator, args)?;
        let run = CommandRunner::execute(&spec)
            .await
            .map_err(|e| AtlasFusionError::Tool {
                tool: collaborator.name().to_string(),
                reason: format!("{:#}", e),
            })?;
        if run.passed() {
            debug!(tool = %collaborator, duration_ms = run.duration_ms, "exited");
        } else {
            warn!(
                tool = %collaborator,
                exit_code = run.exit_code,
                stderr = %run.stderr.trim(),
                "exited with failure"
            );
        }
        Ok(run)
    }
}

#[async_trait]
impl Toolkit for ProcessToolkit {
    async fn register(&self, request: &RegistrationRequest) -> Result<ToolRun> {
        self.invoke(Collaborator::Registrator, command::registration_args(request))
            .await
    }

    async fn resample(&self, request: &ResampleRequest) -> Result<ToolRun> {
        self.invoke(Collaborator::Resampler, command::resample_args(request))
            .await
    }

    async fn fuse_labels(&self, request: &FusionRequest) -> Result<ToolRun> {
        self.invoke(Collaborator::LabelFusion, command::fusion_args(request))
            .await
    }

    async fn correct_volume(&self, request: &CorrectionRequest) -> Result<ToolRun> {
        self.invoke(Collaborator::VolumeCorrector, command::correction_args(request))
            .await
    }

    async fn measure_volume(&self, image: &Path, label: u32) -> Result<f64> {
        let run = self
            .invoke(Collaborator::VolumeMeasurer, command::measure_args(image, label))
            .await?;
        if !run.passed() {
            return Err(AtlasFusionError::Tool {
                tool: run.tool,
                reason: format!("exit code {}: {}", run.exit_code, run.stderr.trim()),
            });
        }
        parse_volume(&run.stdout).ok_or_else(|| AtlasFusionError::Tool {
            tool: run.tool.clone(),
            reason: format!("no volume in output '{}'", run.stdout.trim()),
        })
    }

    async fn image_arithmetic(
        &self,
        a: &Path,
        op: ArithmeticOp,
        b: &Path,
        output: &Path,
    ) -> Result<ToolRun> {
        self.invoke(
            Collaborator::ImageArithmetic,
            command::arithmetic_args(a, op, b, output),
        )
        .await
    }

    async fn relabel(&self, request: &RelabelRequest) -> Result<ToolRun> {
        self.invoke(Collaborator::Relabeler, command::relabel_args(request))
            .await
    }
}
