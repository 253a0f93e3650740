//! Reference atlas library.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AtlasFusionError, Result};
use crate::naming::{image_stem, ATLAS_MARKER};

/// One pre-labeled template image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtlasEntry {
    /// Absolute (atlas-root resolved) path to the template grayscale image.
    pub template_path: PathBuf,

    /// Template gestational age in weeks.
    pub template_age: i32,

    /// Template identity, the file stem of `template_path`.
    pub template_name: String,
}

impl AtlasEntry {
    pub fn new(template_path: impl Into<PathBuf>, template_age: i32) -> Self {
        let template_path = template_path.into();
        let template_name = image_stem(&template_path);
        Self {
            template_path,
            template_age,
            template_name,
        }
    }
}

/// The full atlas set, in manifest order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AtlasLibrary {
    pub entries: Vec<AtlasEntry>,
}

impl AtlasLibrary {
    pub fn new(entries: Vec<AtlasEntry>) -> Self {
        Self { entries }
    }

    /// Load the atlas manifest, resolving each relative path against `atlas_root`.
    pub fn load(manifest: &Path, atlas_root: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(manifest).map_err(|e| {
            AtlasFusionError::manifest(manifest, 0, format!("cannot read atlas manifest: {}", e))
        })?;
        Self::parse(manifest, &content, atlas_root)
    }

    /// Parse `<path-relative-to-atlas-root> <age:int>` lines.
    ///
    /// Both fields are required and every template file name must carry the
    /// `_atlas` marker, otherwise its label files cannot be derived.
    pub fn parse(manifest: &Path, content: &str, atlas_root: &Path) -> Result<Self> {
        let mut entries = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            let line_no = idx + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let fields: Vec<&str> = trimmed.split_whitespace().collect();
            if fields.len() != 2 {
                return Err(AtlasFusionError::manifest(
                    manifest,
                    line_no,
                    format!("expected '<path> <age>', got {} field(s)", fields.len()),
                ));
            }

            let age = fields[1].parse::<i32>().map_err(|_| {
                AtlasFusionError::manifest(
                    manifest,
                    line_no,
                    format!("age '{}' is not an integer", fields[1]),
                )
            })?;

            let entry = AtlasEntry::new(atlas_root.join(fields[0]), age);
            if !entry.template_name.contains(ATLAS_MARKER) {
                return Err(AtlasFusionError::manifest(
                    manifest,
                    line_no,
                    format!(
                        "template '{}' has no '{}' marker",
                        entry.template_name, ATLAS_MARKER
                    ),
                ));
            }
            entries.push(entry);
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AtlasEntry> {
        self.entries.iter()
    }
}
