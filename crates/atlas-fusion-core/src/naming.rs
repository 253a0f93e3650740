//! Pure naming functions.
//!
//! Every path the pipeline reads or writes is derived here, so the
//! filesystem layout can be tested without touching disk.
//!
//! Per-subject layout under `<outputDir>/<subject>/`:
//!
//! ```text
//! template_rT/   warped templates, warped labels, transforms
//! log/           input echo, reproduction command, fusion manifests
//! seg/           fused label maps
//! PVC/           partial-volume corrected maps
//! calc/          parcellation temporaries and combined outputs
//! ```

use std::path::{Path, PathBuf};

use crate::domain::{AtlasEntry, LabelScheme, Subject};
use crate::error::{AtlasFusionError, Result};

/// Marker every template file name carries; replaced by `_<suffix>` to find labels.
pub const ATLAS_MARKER: &str = "_atlas";

/// Marker appended to corrected segmentations.
pub const CORRECTION_MARKER: &str = "_pvc";

/// Marker that replaces [`CORRECTION_MARKER`] in parcellated outputs.
pub const PARCELLATION_MARKER: &str = "_parc";

/// Extension of every image the pipeline writes.
pub const IMAGE_EXT: &str = ".nii.gz";

const MULTI_PART_EXTENSIONS: &[&str] = &[".nii.gz", ".img.gz", ".hdr.gz"];

/// File name of `path` with its image extension removed.
///
/// Handles `.nii.gz` as a single extension.
pub fn image_stem(path: &Path) -> String {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    for ext in MULTI_PART_EXTENSIONS {
        if let Some(stem) = file_name.strip_suffix(ext) {
            return stem.to_string();
        }
    }
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or(file_name)
}

/// Derive a label file name from a template file name.
///
/// The last `_atlas` occurrence is replaced with `_<suffix>`:
/// `t2w_GA30_atlas.nii` with `tissue` gives `t2w_GA30_tissue.nii`.
pub fn label_file_name(template_file_name: &str, suffix: &str) -> Result<String> {
    let idx = template_file_name.rfind(ATLAS_MARKER).ok_or_else(|| {
        AtlasFusionError::Naming(format!(
            "template '{}' has no '{}' marker",
            template_file_name, ATLAS_MARKER
        ))
    })?;
    Ok(format!(
        "{}_{}{}",
        &template_file_name[..idx],
        suffix,
        &template_file_name[idx + ATLAS_MARKER.len()..]
    ))
}

/// Label path for `template_path`, resolved in the template's directory.
pub fn label_path(template_path: &Path, suffix: &str) -> Result<PathBuf> {
    let file_name = template_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            AtlasFusionError::Naming(format!("'{}' has no file name", template_path.display()))
        })?;
    let label = label_file_name(&file_name, suffix)?;
    Ok(template_path.with_file_name(label))
}

/// Replace the last `_pvc` in a corrected file name with `_parc`.
pub fn parcellation_file_name(corrected_file_name: &str) -> Option<String> {
    let idx = corrected_file_name.rfind(CORRECTION_MARKER)?;
    Some(format!(
        "{}{}{}",
        &corrected_file_name[..idx],
        PARCELLATION_MARKER,
        &corrected_file_name[idx + CORRECTION_MARKER.len()..]
    ))
}

/// Whether `file_name` is a corrected segmentation of the tissue scheme.
pub fn is_corrected_tissue_file(file_name: &str, tissue_suffix: &str) -> bool {
    file_name.ends_with(&format!(
        "_{}{}{}",
        tissue_suffix, CORRECTION_MARKER, IMAGE_EXT
    ))
}

/// Working area of one subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectLayout {
    root: PathBuf,
    subject: String,
}

impl SubjectLayout {
    pub fn new(output_dir: &Path, subject: &Subject) -> Self {
        Self::for_name(output_dir, &subject.name)
    }

    pub fn for_name(output_dir: &Path, subject_name: &str) -> Self {
        Self {
            root: output_dir.join(subject_name),
            subject: subject_name.to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn subject_name(&self) -> &str {
        &self.subject
    }

    pub fn template_dir(&self) -> PathBuf {
        self.root.join("template_rT")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("log")
    }

    pub fn seg_dir(&self) -> PathBuf {
        self.root.join("seg")
    }

    pub fn pvc_dir(&self) -> PathBuf {
        self.root.join("PVC")
    }

    pub fn calc_dir(&self) -> PathBuf {
        self.root.join("calc")
    }

    /// Create every directory of the layout.
    pub fn create_all(&self) -> Result<()> {
        for dir in [
            self.template_dir(),
            self.log_dir(),
            self.seg_dir(),
            self.pvc_dir(),
            self.calc_dir(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Output prefix handed to the registrator for `atlas`.
    pub fn registration_prefix(&self, atlas: &AtlasEntry) -> PathBuf {
        self.template_dir()
            .join(format!("{}_to_{}_", atlas.template_name, self.subject))
    }

    pub fn affine_transform(&self, atlas: &AtlasEntry) -> PathBuf {
        suffixed(&self.registration_prefix(atlas), "0GenericAffine.mat")
    }

    pub fn deformable_field(&self, atlas: &AtlasEntry) -> PathBuf {
        suffixed(&self.registration_prefix(atlas), "1Warp.nii.gz")
    }

    pub fn warped_grayscale(&self, atlas: &AtlasEntry) -> PathBuf {
        suffixed(&self.registration_prefix(atlas), "Warped.nii.gz")
    }

    /// Warped copy of a template label file in subject space.
    pub fn warped_label(&self, label_path: &Path) -> PathBuf {
        self.template_dir().join(format!(
            "{}_to_{}{}",
            image_stem(label_path),
            self.subject,
            IMAGE_EXT
        ))
    }

    pub fn input_echo(&self) -> PathBuf {
        self.log_dir().join("input.txt")
    }

    pub fn reproduction_command(&self) -> PathBuf {
        self.log_dir().join("command.txt")
    }

    pub fn atlas_manifest(&self, scheme: &LabelScheme) -> PathBuf {
        self.log_dir().join(format!("{}_atlases.txt", scheme.tag()))
    }

    pub fn label_manifest(&self, scheme: &LabelScheme) -> PathBuf {
        self.log_dir().join(format!("{}_labels.txt", scheme.tag()))
    }

    pub fn fused(&self, scheme: &LabelScheme) -> PathBuf {
        self.seg_dir()
            .join(format!("{}_{}{}", self.subject, scheme.tag(), IMAGE_EXT))
    }

    pub fn corrected(&self, scheme: &LabelScheme) -> PathBuf {
        self.pvc_dir().join(format!(
            "{}_{}{}{}",
            self.subject,
            scheme.tag(),
            CORRECTION_MARKER,
            IMAGE_EXT
        ))
    }

    /// Combined parcellation output for a corrected file name, if it carries the marker.
    pub fn parcellated(&self, corrected_file_name: &str) -> Option<PathBuf> {
        parcellation_file_name(corrected_file_name).map(|name| self.calc_dir().join(name))
    }

    /// Temporaries used while parcellating `corrected_file_name`: (mask, complement, product).
    pub fn parcellation_temporaries(&self, corrected_file_name: &str) -> (PathBuf, PathBuf, PathBuf) {
        let stem = image_stem(Path::new(corrected_file_name));
        let calc = self.calc_dir();
        (
            calc.join(format!("{}_cp_mask{}", stem, IMAGE_EXT)),
            calc.join(format!("{}_non_cp{}", stem, IMAGE_EXT)),
            calc.join(format!("{}_cp_regions{}", stem, IMAGE_EXT)),
        )
    }
}

fn suffixed(prefix: &Path, suffix: &str) -> PathBuf {
    let mut s = prefix.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_file_name_substitutes_marker() {
        assert_eq!(
            label_file_name("t2w_GA30_atlas.nii", "tissue").unwrap(),
            "t2w_GA30_tissue.nii"
        );
    }

    #[test]
    fn test_label_file_name_uses_last_marker() {
        assert_eq!(
            label_file_name("my_atlas_GA30_atlas.nii.gz", "regional").unwrap(),
            "my_atlas_GA30_regional.nii.gz"
        );
    }

    #[test]
    fn test_label_file_name_without_marker() {
        assert!(label_file_name("t2w_GA30.nii", "tissue").is_err());
    }

    #[test]
    fn test_label_path_same_directory() {
        let label = label_path(Path::new("/atlases/GA30/t2w_GA30_atlas.nii"), "tissue").unwrap();
        assert_eq!(label, PathBuf::from("/atlases/GA30/t2w_GA30_tissue.nii"));
    }

    #[test]
    fn test_image_stem() {
        assert_eq!(image_stem(Path::new("/a/sub01.nii.gz")), "sub01");
        assert_eq!(image_stem(Path::new("/a/sub01.nii")), "sub01");
        assert_eq!(image_stem(Path::new("sub01")), "sub01");
        assert_eq!(image_stem(Path::new("/a/sub.01.mha")), "sub.01");
    }

    #[test]
    fn test_registration_outputs_share_prefix() {
        let layout = SubjectLayout::for_name(Path::new("/out"), "sub01");
        let atlas = AtlasEntry::new("/atlases/t2w_GA30_atlas.nii.gz", 30);
        assert_eq!(
            layout.warped_grayscale(&atlas),
            PathBuf::from("/out/sub01/template_rT/t2w_GA30_atlas_to_sub01_Warped.nii.gz")
        );
        assert_eq!(
            layout.affine_transform(&atlas),
            PathBuf::from("/out/sub01/template_rT/t2w_GA30_atlas_to_sub01_0GenericAffine.mat")
        );
        assert_eq!(
            layout.deformable_field(&atlas),
            PathBuf::from("/out/sub01/template_rT/t2w_GA30_atlas_to_sub01_1Warp.nii.gz")
        );
    }

    #[test]
    fn test_warped_label_is_per_scheme() {
        let layout = SubjectLayout::for_name(Path::new("/out"), "sub01");
        let tissue = layout.warped_label(Path::new("/atlases/t2w_GA30_tissue.nii.gz"));
        let regional = layout.warped_label(Path::new("/atlases/t2w_GA30_regional.nii.gz"));
        assert_ne!(tissue, regional);
        assert_eq!(
            tissue,
            PathBuf::from("/out/sub01/template_rT/t2w_GA30_tissue_to_sub01.nii.gz")
        );
    }

    #[test]
    fn test_stage_outputs() {
        let layout = SubjectLayout::for_name(Path::new("/out"), "sub01");
        let scheme = LabelScheme::new("tissue", "mas");
        assert_eq!(
            layout.fused(&scheme),
            PathBuf::from("/out/sub01/seg/sub01_mas_tissue.nii.gz")
        );
        assert_eq!(
            layout.corrected(&scheme),
            PathBuf::from("/out/sub01/PVC/sub01_mas_tissue_pvc.nii.gz")
        );
        assert_eq!(
            layout.atlas_manifest(&scheme),
            PathBuf::from("/out/sub01/log/mas_tissue_atlases.txt")
        );
        assert_eq!(
            layout.label_manifest(&scheme),
            PathBuf::from("/out/sub01/log/mas_tissue_labels.txt")
        );
    }

    #[test]
    fn test_parcellation_name() {
        assert_eq!(
            parcellation_file_name("sub01_mas_tissue_pvc.nii.gz").as_deref(),
            Some("sub01_mas_tissue_parc.nii.gz")
        );
        assert!(parcellation_file_name("sub01_mas_tissue.nii.gz").is_none());
    }

    #[test]
    fn test_corrected_tissue_pattern() {
        assert!(is_corrected_tissue_file("sub01_mas_tissue_pvc.nii.gz", "tissue"));
        assert!(!is_corrected_tissue_file(
            "sub01_mas_tissue_subplate_pvc.nii.gz",
            "tissue"
        ));
        assert!(!is_corrected_tissue_file("sub01_mas_tissue.nii.gz", "tissue"));
    }
}
