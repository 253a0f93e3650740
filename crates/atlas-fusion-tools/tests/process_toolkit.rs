//! ProcessToolkit against shell-script stand-ins for the real binaries.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use atlas_fusion_core::{
    ArithmeticOp, AtlasFusionError, Interpolation, RegistrationParams, RegistrationRequest,
    ResampleRequest, Toolkit, ToolkitConfig,
};
use atlas_fusion_tools::{check_dependencies_in, ProcessToolkit};
use tempfile::TempDir;

const REGISTRATOR: &str = r#"#!/bin/sh
while [ $# -gt 0 ]; do
  case "$1" in
    -o) prefix="$2"; shift ;;
  esac
  shift
done
echo affine > "${prefix}0GenericAffine.mat"
echo warp > "${prefix}1Warp.nii.gz"
echo warped > "${prefix}Warped.nii.gz"
"#;

/// Writes its own argument list to the `-o` output.
const RESAMPLER: &str = r#"#!/bin/sh
echo "$@" > "$6"
"#;

const MEASURER: &str = r#"#!/bin/sh
echo "Volume of label $2: 96.5"
"#;

const FAILING: &str = r#"#!/bin/sh
echo "cannot open input" >&2
exit 3
"#;

const SUCCEEDING: &str = "#!/bin/sh\nexit 0\n";

fn install(dir: &Path, name: &str, body: &str) {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// A toolkit root whose `bin/` holds every collaborator.
fn toolkit_root(measurer: &str, arithmetic: &str) -> (TempDir, ToolkitConfig) {
    let tmp = TempDir::new().unwrap();
    let config = ToolkitConfig {
        root: Some(tmp.path().to_path_buf()),
        ..ToolkitConfig::default()
    };
    let bin = tmp.path().join("bin");
    install(&bin, &config.registrator, REGISTRATOR);
    install(&bin, &config.resampler, RESAMPLER);
    install(&bin, &config.label_fusion, SUCCEEDING);
    install(&bin, &config.volume_corrector, SUCCEEDING);
    install(&bin, &config.volume_measurer, measurer);
    install(&bin, &config.image_arithmetic, arithmetic);
    install(&bin, &config.relabeler, SUCCEEDING);
    (tmp, config)
}

fn toolkit(config: &ToolkitConfig) -> ProcessToolkit {
    let binaries = check_dependencies_in(config, None).expect("all binaries installed");
    ProcessToolkit::new(binaries, 30)
}

#[tokio::test]
async fn test_registration_writes_expected_outputs() {
    let (tmp, config) = toolkit_root(MEASURER, SUCCEEDING);
    let toolkit = toolkit(&config);
    let prefix = tmp.path().join("t2w_GA30_atlas_to_sub01_");

    let run = toolkit
        .register(&RegistrationRequest {
            moving: PathBuf::from("t2w_GA30_atlas.nii.gz"),
            fixed: PathBuf::from("sub01.nii.gz"),
            output_prefix: prefix.clone(),
            params: RegistrationParams::default(),
        })
        .await
        .unwrap();

    assert!(run.passed());
    assert_eq!(run.tool, "registrator");
    for suffix in ["0GenericAffine.mat", "1Warp.nii.gz", "Warped.nii.gz"] {
        let mut path = prefix.clone().into_os_string();
        path.push(suffix);
        assert!(PathBuf::from(path).exists(), "missing {suffix}");
    }
}

#[tokio::test]
async fn test_resampler_receives_label_interpolation() {
    let (tmp, config) = toolkit_root(MEASURER, SUCCEEDING);
    let toolkit = toolkit(&config);
    let output = tmp.path().join("warped_label.nii.gz");

    toolkit
        .resample(&ResampleRequest {
            source: PathBuf::from("t2w_GA30_tissue.nii.gz"),
            output: output.clone(),
            reference: PathBuf::from("sub01.nii.gz"),
            deformable_field: PathBuf::from("p_1Warp.nii.gz"),
            affine_transform: PathBuf::from("p_0GenericAffine.mat"),
            interpolation: Interpolation::LabelPreserving,
        })
        .await
        .unwrap();

    let args = std::fs::read_to_string(&output).unwrap();
    assert!(args.starts_with("-d 3 -i t2w_GA30_tissue.nii.gz"));
    assert!(args.contains("-t p_1Warp.nii.gz -t p_0GenericAffine.mat"));
    assert!(args.trim_end().ends_with("-n GenericLabel"));
}

#[tokio::test]
async fn test_measure_volume_parses_stdout() {
    let (_tmp, config) = toolkit_root(MEASURER, SUCCEEDING);
    let volume = toolkit(&config)
        .measure_volume(Path::new("seg.nii.gz"), 112)
        .await
        .unwrap();
    assert_eq!(volume, 96.5);
}

#[tokio::test]
async fn test_measure_volume_without_number_is_an_error() {
    let (_tmp, config) = toolkit_root("#!/bin/sh\necho none\n", SUCCEEDING);
    let err = toolkit(&config)
        .measure_volume(Path::new("seg.nii.gz"), 112)
        .await
        .unwrap_err();
    assert!(matches!(err, AtlasFusionError::Tool { .. }));
}

#[tokio::test]
async fn test_failing_tool_returns_exit_record() {
    let (tmp, config) = toolkit_root(MEASURER, FAILING);
    let run = toolkit(&config)
        .image_arithmetic(
            Path::new("a.nii.gz"),
            ArithmeticOp::Multiply,
            Path::new("b.nii.gz"),
            &tmp.path().join("c.nii.gz"),
        )
        .await
        .unwrap();
    assert!(!run.passed());
    assert_eq!(run.exit_code, 3);
    assert!(run.stderr.contains("cannot open input"));
}

#[test]
fn test_missing_binary_fails_dependency_check() {
    let (tmp, config) = toolkit_root(MEASURER, SUCCEEDING);
    std::fs::remove_file(tmp.path().join("bin").join(&config.label_fusion)).unwrap();
    let err = check_dependencies_in(&config, None).unwrap_err();
    assert!(err.is_fatal_startup());
    assert!(err.to_string().contains("antsJointFusionManifest"));
}
