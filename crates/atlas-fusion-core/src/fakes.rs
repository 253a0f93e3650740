//! In-process fake toolkit (testing only)
//!
//! [`VoxelToolkit`] satisfies the [`Toolkit`] contract on plain-text
//! "images": files holding whitespace-separated integer voxel values. It
//! produces the same output files the real collaborators would, records every
//! invocation, and can be told to make a tool exit non-zero without output.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{AtlasFusionError, Result};
use crate::toolkit::*;

pub const REGISTER: &str = "register";
pub const RESAMPLE: &str = "resample";
pub const FUSE_LABELS: &str = "fuse_labels";
pub const CORRECT_VOLUME: &str = "correct_volume";
pub const MEASURE_VOLUME: &str = "measure_volume";
pub const IMAGE_ARITHMETIC: &str = "image_arithmetic";
pub const RELABEL: &str = "relabel";

/// One recorded collaborator call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub tool: &'static str,
    /// Primary output (or measured image for `measure_volume`).
    pub path: PathBuf,
}

/// Start or end of a recorded call, in the order they happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mark {
    Start(&'static str, PathBuf),
    End(&'static str, PathBuf),
}

/// Read a text image.
pub fn read_voxels(path: &Path) -> Result<Vec<i64>> {
    let content = std::fs::read_to_string(path)?;
    content
        .split_whitespace()
        .map(|v| {
            v.parse::<i64>().map_err(|_| AtlasFusionError::Tool {
                tool: "voxel-fake".to_string(),
                reason: format!("'{}' in {} is not a voxel value", v, path.display()),
            })
        })
        .collect()
}

/// Write a text image.
pub fn write_voxels(path: &Path, voxels: &[i64]) -> Result<()> {
    let body: Vec<String> = voxels.iter().map(|v| v.to_string()).collect();
    std::fs::write(path, body.join(" "))?;
    Ok(())
}

/// Fake toolkit operating on text voxel files.
#[derive(Debug, Default)]
pub struct VoxelToolkit {
    invocations: Mutex<Vec<Invocation>>,
    marks: Mutex<Vec<Mark>>,
    failing: Mutex<HashSet<&'static str>>,
    /// Voxels of the corrected label removed by `correct_volume`.
    correction_label: u32,
    correction_removes: usize,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl VoxelToolkit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `correct_volume` zero out the first `removes` voxels of `label`.
    pub fn with_correction(mut self, label: u32, removes: usize) -> Self {
        self.correction_label = label;
        self.correction_removes = removes;
        self
    }

    /// Sleep this long inside every job-producing call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make `tool` exit with status 1 and write nothing.
    pub fn fail(&self, tool: &'static str) {
        self.failing.lock().unwrap().insert(tool);
    }

    pub fn recover(&self, tool: &'static str) {
        self.failing.lock().unwrap().remove(tool);
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    /// Number of recorded calls to `tool`.
    pub fn count(&self, tool: &str) -> usize {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.tool == tool)
            .count()
    }

    pub fn marks(&self) -> Vec<Mark> {
        self.marks.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.invocations.lock().unwrap().clear();
        self.marks.lock().unwrap().clear();
    }

    /// Highest number of calls observed running at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn remove_label_voxels(&self, request: &CorrectionRequest) -> Result<()> {
        let mut voxels = read_voxels(&request.segmentation)?;
        let label = i64::from(self.correction_label);
        voxels
            .iter_mut()
            .filter(|v| **v == label)
            .take(self.correction_removes)
            .for_each(|v| *v = 0);
        write_voxels(&request.output, &voxels)
    }

    /// Record the call; `Some` with a failing run when `tool` is set to fail.
    async fn enter(&self, tool: &'static str, path: &Path) -> Option<ToolRun> {
        self.invocations.lock().unwrap().push(Invocation {
            tool,
            path: path.to_path_buf(),
        });

        self.marks
            .lock()
            .unwrap()
            .push(Mark::Start(tool, path.to_path_buf()));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.marks
            .lock()
            .unwrap()
            .push(Mark::End(tool, path.to_path_buf()));

        if self.failing.lock().unwrap().contains(tool) {
            Some(ToolRun::failed(tool, 1, "configured to fail"))
        } else {
            None
        }
    }
}

fn copy_image(from: &Path, to: &Path) -> Result<()> {
    std::fs::copy(from, to)?;
    Ok(())
}

/// Run `body`; an I/O problem becomes a failing exit rather than an error,
/// the way a real tool reports a missing input.
fn exit_of(tool: &'static str, body: Result<()>) -> ToolRun {
    match body {
        Ok(()) => ToolRun::ok(tool),
        Err(e) => ToolRun::failed(tool, 1, e.to_string()),
    }
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut s = prefix.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

/// Transform files hold the moving image path they were computed from.
fn write_registration(request: &RegistrationRequest, warped: &Path) -> Result<()> {
    copy_image(&request.moving, warped)?;
    let moving = request.moving.display().to_string();
    std::fs::write(with_suffix(&request.output_prefix, "0GenericAffine.mat"), &moving)?;
    std::fs::write(with_suffix(&request.output_prefix, "1Warp.nii.gz"), &moving)?;
    Ok(())
}

/// Majority vote is not modelled: the first listed label wins.
fn fuse_first_label(request: &FusionRequest) -> Result<()> {
    let listing = std::fs::read_to_string(&request.label_manifest)?;
    let first = listing
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| AtlasFusionError::Tool {
            tool: FUSE_LABELS.to_string(),
            reason: "empty label manifest".to_string(),
        })?;
    copy_image(Path::new(first), &request.output)
}

fn pointwise(a: &Path, op: ArithmeticOp, b: &Path, output: &Path) -> Result<()> {
    let left = read_voxels(a)?;
    let right = read_voxels(b)?;
    if left.len() != right.len() {
        return Err(AtlasFusionError::Tool {
            tool: IMAGE_ARITHMETIC.to_string(),
            reason: format!("image sizes differ: {} vs {}", left.len(), right.len()),
        });
    }
    let combined: Vec<i64> = left
        .iter()
        .zip(&right)
        .map(|(x, y)| match op {
            ArithmeticOp::Multiply => x * y,
            ArithmeticOp::Add => x + y,
        })
        .collect();
    write_voxels(output, &combined)
}

fn relabel_voxels(request: &RelabelRequest) -> Result<()> {
    let mapped: Vec<i64> = read_voxels(&request.image)?
        .into_iter()
        .map(|v| {
            let hit = request.from.iter().position(|&f| i64::from(f) == v);
            match (hit, request.default_value) {
                (Some(i), _) => request.to.get(i).copied().map_or(v, i64::from),
                (None, Some(default)) => i64::from(default),
                (None, None) => v,
            }
        })
        .collect();
    write_voxels(&request.output, &mapped)
}

#[async_trait]
impl Toolkit for VoxelToolkit {
    async fn register(&self, request: &RegistrationRequest) -> Result<ToolRun> {
        let warped = with_suffix(&request.output_prefix, "Warped.nii.gz");
        if let Some(run) = self.enter(REGISTER, &warped).await {
            return Ok(run);
        }
        Ok(exit_of(REGISTER, write_registration(request, &warped)))
    }

    async fn resample(&self, request: &ResampleRequest) -> Result<ToolRun> {
        if let Some(run) = self.enter(RESAMPLE, &request.output).await {
            return Ok(run);
        }
        Ok(exit_of(RESAMPLE, copy_image(&request.source, &request.output)))
    }

    async fn fuse_labels(&self, request: &FusionRequest) -> Result<ToolRun> {
        if let Some(run) = self.enter(FUSE_LABELS, &request.output).await {
            return Ok(run);
        }
        Ok(exit_of(FUSE_LABELS, fuse_first_label(request)))
    }

    async fn correct_volume(&self, request: &CorrectionRequest) -> Result<ToolRun> {
        if let Some(run) = self.enter(CORRECT_VOLUME, &request.output).await {
            return Ok(run);
        }
        Ok(exit_of(CORRECT_VOLUME, self.remove_label_voxels(request)))
    }

    async fn measure_volume(&self, image: &Path, label: u32) -> Result<f64> {
        if self.enter(MEASURE_VOLUME, image).await.is_some() {
            return Err(AtlasFusionError::Tool {
                tool: MEASURE_VOLUME.to_string(),
                reason: "configured to fail".to_string(),
            });
        }
        let label = i64::from(label);
        let count = read_voxels(image)?.iter().filter(|v| **v == label).count();
        Ok(count as f64)
    }

    async fn image_arithmetic(
        &self,
        a: &Path,
        op: ArithmeticOp,
        b: &Path,
        output: &Path,
    ) -> Result<ToolRun> {
        if let Some(run) = self.enter(IMAGE_ARITHMETIC, output).await {
            return Ok(run);
        }
        Ok(exit_of(IMAGE_ARITHMETIC, pointwise(a, op, b, output)))
    }

    async fn relabel(&self, request: &RelabelRequest) -> Result<ToolRun> {
        if let Some(run) = self.enter(RELABEL, &request.output).await {
            return Ok(run);
        }
        Ok(exit_of(RELABEL, relabel_voxels(request)))
    }
}
