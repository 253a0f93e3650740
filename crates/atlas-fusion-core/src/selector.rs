//! Atlas selection by gestational age.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::{AtlasEntry, AtlasLibrary, LabelScheme};
use crate::error::Result;
use crate::naming::label_path;

/// Maximum age difference, in weeks, between a subject and a usable atlas.
pub const AGE_WINDOW: i32 = 1;

/// An atlas chosen for one subject under one label scheme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedAtlas {
    pub atlas: AtlasEntry,

    /// Template label file for the scheme, next to the template.
    pub label_path: PathBuf,

    /// Whether `label_path` existed when the atlas was matched.
    pub label_exists: bool,
}

/// Whether an atlas of `template_age` may label a subject of `subject_age`.
pub fn within_age_window(template_age: i32, subject_age: i32) -> bool {
    template_age.abs_diff(subject_age) <= AGE_WINDOW.unsigned_abs()
}

/// Atlases usable for `subject_name` at `subject_age`, in manifest order.
///
/// An atlas whose template name equals the subject name is excluded so an
/// image is never used to label itself.
pub fn select_atlases(
    library: &AtlasLibrary,
    subject_name: &str,
    subject_age: i32,
    scheme: &LabelScheme,
) -> Result<Vec<MatchedAtlas>> {
    let mut matched = Vec::new();
    for atlas in library.iter() {
        if !within_age_window(atlas.template_age, subject_age) {
            continue;
        }
        if atlas.template_name == subject_name {
            continue;
        }
        let label_path = label_path(&atlas.template_path, &scheme.suffix)?;
        let label_exists = label_path.is_file();
        matched.push(MatchedAtlas {
            atlas: atlas.clone(),
            label_path,
            label_exists,
        });
    }
    Ok(matched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_window_is_symmetric() {
        assert!(within_age_window(29, 30));
        assert!(within_age_window(31, 30));
        assert!(within_age_window(30, 30));
        assert!(!within_age_window(28, 30));
        assert!(!within_age_window(32, 30));
    }

    #[test]
    fn test_window_at_extreme_ages() {
        assert!(!within_age_window(i32::MAX, -1));
        assert!(!within_age_window(i32::MIN, i32::MAX));
        assert!(within_age_window(i32::MAX, i32::MAX - 1));
    }

    #[test]
    fn test_select_excludes_self_and_out_of_window() {
        let library = AtlasLibrary::new(vec![
            AtlasEntry::new("/atlases/a28_atlas.nii.gz", 28),
            AtlasEntry::new("/atlases/a29_atlas.nii.gz", 29),
            AtlasEntry::new("/atlases/sub30_atlas.nii.gz", 30),
            AtlasEntry::new("/atlases/a31_atlas.nii.gz", 31),
            AtlasEntry::new("/atlases/a32_atlas.nii.gz", 32),
        ]);
        let scheme = LabelScheme::new("tissue", "mas");

        let matched = select_atlases(&library, "sub30_atlas", 30, &scheme).unwrap();
        let names: Vec<_> = matched
            .iter()
            .map(|m| m.atlas.template_name.as_str())
            .collect();
        assert_eq!(names, vec!["a29_atlas", "a31_atlas"]);
    }

    #[test]
    fn test_label_existence_is_recorded() {
        let dir = tempdir().unwrap();
        let with_label = dir.path().join("t2w_GA30_atlas.nii.gz");
        let without_label = dir.path().join("t2w_GA31_atlas.nii.gz");
        std::fs::write(&with_label, "1").unwrap();
        std::fs::write(&without_label, "1").unwrap();
        std::fs::write(dir.path().join("t2w_GA30_tissue.nii.gz"), "1").unwrap();

        let library = AtlasLibrary::new(vec![
            AtlasEntry::new(&with_label, 30),
            AtlasEntry::new(&without_label, 31),
        ]);
        let scheme = LabelScheme::new("tissue", "mas");
        let matched = select_atlases(&library, "sub01", 30, &scheme).unwrap();

        assert_eq!(matched.len(), 2);
        assert!(matched[0].label_exists);
        assert_eq!(
            matched[0].label_path,
            dir.path().join("t2w_GA30_tissue.nii.gz")
        );
        assert!(!matched[1].label_exists);
    }

    #[test]
    fn test_no_match_is_empty() {
        let library = AtlasLibrary::new(vec![AtlasEntry::new("/atlases/a20_atlas.nii.gz", 20)]);
        let scheme = LabelScheme::new("tissue", "mas");
        assert!(select_atlases(&library, "sub", 35, &scheme)
            .unwrap()
            .is_empty());
    }
}
