//! Shared fixtures: a tiny atlas library and subjects as text voxel images.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use atlas_fusion_core::fakes::write_voxels;
use atlas_fusion_core::naming::SubjectLayout;
use atlas_fusion_core::{
    select_atlases, AtlasLibrary, LabelScheme, Subject, SubjectContext,
};

/// Write `<root>/t2w_<name>_atlas.nii.gz` plus one label file per `(suffix, voxels)`.
///
/// Returns the atlas manifest line.
pub fn write_atlas(root: &Path, name: &str, age: i32, labels: &[(&str, Vec<i64>)]) -> String {
    std::fs::create_dir_all(root).unwrap();
    let template = format!("t2w_{name}_atlas.nii.gz");
    write_voxels(&root.join(&template), &[1, 2, 3]).unwrap();
    for (suffix, voxels) in labels {
        write_voxels(&root.join(format!("t2w_{name}_{suffix}.nii.gz")), voxels).unwrap();
    }
    format!("{template} {age}")
}

pub fn library(root: &Path, lines: &[String]) -> AtlasLibrary {
    AtlasLibrary::parse(Path::new("atlases.txt"), &lines.join("\n"), root).unwrap()
}

pub fn write_subject(dir: &Path, name: &str) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(format!("{name}.nii.gz"));
    write_voxels(&path, &[4, 5, 6]).unwrap();
    path
}

pub fn scheme(suffix: &str) -> LabelScheme {
    LabelScheme::new(suffix, "mas")
}

/// Context for `subject` with its layout created under `output_dir`.
pub fn context(
    output_dir: &Path,
    library: &AtlasLibrary,
    subject: &Subject,
    scheme: &LabelScheme,
) -> SubjectContext {
    let age = subject.gestational_age.unwrap();
    let matched = select_atlases(library, &subject.name, age, scheme).unwrap();
    let layout = SubjectLayout::new(output_dir, subject);
    layout.create_all().unwrap();
    SubjectContext::new(subject.clone(), age, scheme.clone(), layout, matched)
}
