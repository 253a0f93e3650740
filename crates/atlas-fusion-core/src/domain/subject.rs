//! Subject manifest parsing.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AtlasFusionError, Result};
use crate::naming::image_stem;

/// One subject image to be segmented.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// Path to the subject's grayscale image.
    pub image_path: PathBuf,

    /// Identity derived from the image file stem.
    pub name: String,

    /// Gestational age in weeks. `None` when the manifest line has no age.
    pub gestational_age: Option<i32>,

    /// The manifest line this subject was parsed from, echoed into `log/`.
    pub source_line: String,
}

impl Subject {
    pub fn new(image_path: impl Into<PathBuf>, gestational_age: Option<i32>) -> Self {
        let image_path = image_path.into();
        let name = image_stem(&image_path);
        let source_line = match gestational_age {
            Some(age) => format!("{} {}", image_path.display(), age),
            None => image_path.display().to_string(),
        };
        Self {
            image_path,
            name,
            gestational_age,
            source_line,
        }
    }
}

/// Parse one manifest line of the form `<imagePath> [<age:int>]`.
///
/// Returns `Ok(None)` for blank lines and `#` comments.
pub fn parse_subject_line(line: &str) -> std::result::Result<Option<Subject>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let mut fields = trimmed.split_whitespace();
    let image = fields.next().ok_or_else(|| "missing image path".to_string())?;
    let age = match fields.next() {
        Some(raw) => Some(
            raw.parse::<i32>()
                .map_err(|_| format!("age '{}' is not an integer", raw))?,
        ),
        None => None,
    };
    if let Some(extra) = fields.next() {
        return Err(format!("unexpected trailing field '{}'", extra));
    }

    let mut subject = Subject::new(image, age);
    subject.source_line = trimmed.to_string();
    Ok(Some(subject))
}

/// The ordered set of subjects for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectManifest {
    pub subjects: Vec<Subject>,
}

impl SubjectManifest {
    /// Load and parse a subject manifest file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AtlasFusionError::manifest(path, 0, format!("cannot read subject manifest: {}", e))
        })?;
        Self::parse(path, &content)
    }

    /// Parse manifest `content`; `path` is only used for error messages.
    pub fn parse(path: &Path, content: &str) -> Result<Self> {
        let mut subjects = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            match parse_subject_line(line) {
                Ok(Some(subject)) => subjects.push(subject),
                Ok(None) => {}
                Err(reason) => return Err(AtlasFusionError::manifest(path, idx + 1, reason)),
            }
        }
        Ok(Self { subjects })
    }

    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subject> {
        self.subjects.iter()
    }
}

/// Subject names that occur more than once.
///
/// Colliding names share one working directory, so callers should surface
/// these loudly. They are not renamed.
pub fn duplicate_subject_names(subjects: &[Subject]) -> Vec<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for subject in subjects {
        *counts.entry(subject.name.as_str()).or_default() += 1;
    }
    counts
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(name, _)| name.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line_with_age() {
        let subject = parse_subject_line("/data/sub01_T2w.nii.gz 30")
            .unwrap()
            .unwrap();
        assert_eq!(subject.image_path, PathBuf::from("/data/sub01_T2w.nii.gz"));
        assert_eq!(subject.name, "sub01_T2w");
        assert_eq!(subject.gestational_age, Some(30));
        assert_eq!(subject.source_line, "/data/sub01_T2w.nii.gz 30");
    }

    #[test]
    fn test_parse_line_without_age_is_kept() {
        let subject = parse_subject_line("  /data/sub02.nii  ").unwrap().unwrap();
        assert_eq!(subject.name, "sub02");
        assert!(subject.gestational_age.is_none());
    }

    #[test]
    fn test_blank_and_comment_lines_are_skipped() {
        assert!(parse_subject_line("").unwrap().is_none());
        assert!(parse_subject_line("   ").unwrap().is_none());
        assert!(parse_subject_line("# header").unwrap().is_none());
    }

    #[test]
    fn test_non_integer_age_is_rejected() {
        let err = parse_subject_line("/data/sub01.nii.gz 30.5").unwrap_err();
        assert!(err.contains("30.5"));
    }

    #[test]
    fn test_manifest_error_carries_line_number() {
        let content = "/a/s1.nii.gz 30\n\n/a/s2.nii.gz abc\n";
        let err = SubjectManifest::parse(Path::new("subjects.txt"), content).unwrap_err();
        match err {
            AtlasFusionError::Manifest { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_manifest_preserves_order() {
        let content = "/a/s2.nii.gz 31\n/a/s1.nii.gz 30\n";
        let manifest = SubjectManifest::parse(Path::new("m"), content).unwrap();
        let names: Vec<_> = manifest.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["s2", "s1"]);
    }

    #[test]
    fn test_duplicate_names_detected() {
        let subjects = vec![
            Subject::new("/a/s1.nii.gz", Some(30)),
            Subject::new("/b/s1.nii.gz", Some(31)),
            Subject::new("/b/s2.nii.gz", Some(31)),
        ];
        assert_eq!(duplicate_subject_names(&subjects), vec!["s1".to_string()]);
    }
}
