//! Atlas/label manifests consumed by label fusion.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::context::SubjectContext;
use crate::error::Result;
use crate::status::{stage_status, Stage};

/// Parallel lists of warped atlases and their warped labels.
///
/// Entry `i` of both lists comes from the same matched atlas.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtlasLabelManifest {
    pub atlases: Vec<PathBuf>,
    pub labels: Vec<PathBuf>,
}

impl AtlasLabelManifest {
    /// Usable (atlas, label) pairs.
    pub fn len(&self) -> usize {
        self.atlases.len().min(self.labels.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Collect every matched atlas of `ctx` whose warped grayscale and warped
    /// label both exist, in atlas order.
    pub fn assemble(ctx: &SubjectContext) -> Self {
        let mut manifest = Self::default();
        for matched in &ctx.matched {
            let gray = stage_status(&ctx.layout, Stage::WarpGrayscale(&matched.atlas));
            let label = stage_status(&ctx.layout, Stage::WarpLabel(&matched.label_path));
            if gray.is_done() && label.is_done() {
                manifest
                    .atlases
                    .push(ctx.layout.warped_grayscale(&matched.atlas));
                manifest
                    .labels
                    .push(ctx.layout.warped_label(&matched.label_path));
            } else {
                debug!(
                    atlas = %matched.atlas.template_name,
                    grayscale = gray.is_done(),
                    label = label.is_done(),
                    "atlas left out of fusion manifest"
                );
            }
        }
        manifest
    }

    /// Replace both manifest files with this manifest's contents.
    pub fn write(&self, atlas_manifest: &Path, label_manifest: &Path) -> Result<()> {
        std::fs::write(atlas_manifest, render(&self.atlases))?;
        std::fs::write(label_manifest, render(&self.labels))?;
        Ok(())
    }

    /// Read a manifest pair; missing files read as empty lists.
    pub fn read(atlas_manifest: &Path, label_manifest: &Path) -> Result<Self> {
        Ok(Self {
            atlases: read_list(atlas_manifest)?,
            labels: read_list(label_manifest)?,
        })
    }
}

/// Assemble the manifest for `ctx` and overwrite its files in `log/`.
pub fn assemble_and_write(ctx: &SubjectContext) -> Result<AtlasLabelManifest> {
    let manifest = AtlasLabelManifest::assemble(ctx);
    manifest.write(
        &ctx.layout.atlas_manifest(&ctx.scheme),
        &ctx.layout.label_manifest(&ctx.scheme),
    )?;
    info!(
        subject = %ctx.name(),
        scheme = %ctx.scheme,
        pairs = manifest.len(),
        matched = ctx.matched.len(),
        "fusion manifest written"
    );
    Ok(manifest)
}

fn render(paths: &[PathBuf]) -> String {
    let mut out = String::new();
    for path in paths {
        out.push_str(&path.to_string_lossy());
        out.push('\n');
    }
    out
}

fn read_list(path: &Path) -> Result<Vec<PathBuf>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(PathBuf::from)
            .collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AtlasEntry, LabelScheme, Subject};
    use crate::naming::SubjectLayout;
    use crate::selector::MatchedAtlas;
    use tempfile::tempdir;

    fn context(root: &Path, atlases: &[&str]) -> SubjectContext {
        let subject = Subject::new(root.join("sub01.nii.gz"), Some(30));
        let layout = SubjectLayout::new(&root.join("out"), &subject);
        layout.create_all().unwrap();
        let matched = atlases
            .iter()
            .map(|name| {
                let atlas = AtlasEntry::new(root.join(format!("{name}_atlas.nii.gz")), 30);
                MatchedAtlas {
                    label_path: root.join(format!("{name}_tissue.nii.gz")),
                    label_exists: true,
                    atlas,
                }
            })
            .collect();
        SubjectContext::new(subject, 30, LabelScheme::new("tissue", "mas"), layout, matched)
    }

    #[test]
    fn test_label_missing_excludes_atlas() {
        let dir = tempdir().unwrap();
        let ctx = context(dir.path(), &["a", "b"]);
        for m in &ctx.matched {
            std::fs::write(ctx.layout.warped_grayscale(&m.atlas), "1").unwrap();
        }
        // Only atlas b has its label warped.
        std::fs::write(ctx.layout.warped_label(&ctx.matched[1].label_path), "1").unwrap();

        let manifest = AtlasLabelManifest::assemble(&ctx);
        assert_eq!(manifest.len(), 1);
        assert_eq!(
            manifest.atlases,
            vec![ctx.layout.warped_grayscale(&ctx.matched[1].atlas)]
        );
        assert_eq!(
            manifest.labels,
            vec![ctx.layout.warped_label(&ctx.matched[1].label_path)]
        );
    }

    #[test]
    fn test_order_follows_atlas_order() {
        let dir = tempdir().unwrap();
        let ctx = context(dir.path(), &["c", "a", "b"]);
        for m in &ctx.matched {
            std::fs::write(ctx.layout.warped_grayscale(&m.atlas), "1").unwrap();
            std::fs::write(ctx.layout.warped_label(&m.label_path), "1").unwrap();
        }
        let manifest = AtlasLabelManifest::assemble(&ctx);
        let expected: Vec<_> = ctx
            .matched
            .iter()
            .map(|m| ctx.layout.warped_grayscale(&m.atlas))
            .collect();
        assert_eq!(manifest.atlases, expected);
    }

    #[test]
    fn test_write_overwrites_stale_entries() {
        let dir = tempdir().unwrap();
        let ctx = context(dir.path(), &["a"]);
        let atlas_file = ctx.layout.atlas_manifest(&ctx.scheme);
        let label_file = ctx.layout.label_manifest(&ctx.scheme);
        std::fs::write(&atlas_file, "/stale/one\n/stale/two\n").unwrap();
        std::fs::write(&label_file, "/stale/one\n/stale/two\n").unwrap();

        let manifest = assemble_and_write(&ctx).unwrap();
        assert!(manifest.is_empty());

        let reread = AtlasLabelManifest::read(&atlas_file, &label_file).unwrap();
        assert!(reread.is_empty());
    }

    #[test]
    fn test_read_missing_files_is_empty() {
        let dir = tempdir().unwrap();
        let manifest =
            AtlasLabelManifest::read(&dir.path().join("a.txt"), &dir.path().join("l.txt"))
                .unwrap();
        assert_eq!(manifest.len(), 0);
    }
}
