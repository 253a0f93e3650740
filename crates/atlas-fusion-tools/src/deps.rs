//! Dependency resolution.
//!
//! Every collaborator binary must be found before any subject is touched.
//! Lookup order: `<toolkitRoot>/bin`, `<toolkitRoot>`, then `PATH`.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use atlas_fusion_core::{AtlasFusionError, Result, ToolkitConfig};
use tracing::{debug, info};

use crate::command::Collaborator;

/// Absolute program paths for every collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBinaries {
    programs: BTreeMap<Collaborator, PathBuf>,
}

impl ResolvedBinaries {
    pub fn program(&self, collaborator: Collaborator) -> Option<&Path> {
        self.programs.get(&collaborator).map(PathBuf::as_path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Collaborator, &Path)> {
        self.programs.iter().map(|(c, p)| (*c, p.as_path()))
    }
}

/// Find `name` under `root/bin`, `root`, then each directory of `path_var`.
///
/// A name containing a path separator is checked as given.
pub fn resolve_binary(name: &str, root: Option<&Path>, path_var: Option<&OsStr>) -> Option<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(root) = root {
        dirs.push(root.join("bin"));
        dirs.push(root.to_path_buf());
    }
    if let Some(path_var) = path_var {
        dirs.extend(std::env::split_paths(path_var));
    }
    let search = std::env::join_paths(dirs).ok()?;
    let cwd = std::env::current_dir().ok()?;
    which::which_in(name, Some(search), cwd).ok()
}

/// Resolve every collaborator against the process `PATH`.
pub fn check_dependencies(config: &ToolkitConfig) -> Result<ResolvedBinaries> {
    let path_var = std::env::var_os("PATH");
    check_dependencies_in(config, path_var.as_deref())
}

/// Resolve every collaborator, failing with all unresolved names at once.
pub fn check_dependencies_in(
    config: &ToolkitConfig,
    path_var: Option<&OsStr>,
) -> Result<ResolvedBinaries> {
    let mut programs = BTreeMap::new();
    let mut missing = Vec::new();

    for collaborator in Collaborator::ALL {
        let name = collaborator.binary(config);
        match resolve_binary(name, config.root.as_deref(), path_var) {
            Some(path) => {
                debug!(tool = %collaborator, path = %path.display(), "resolved");
                programs.insert(collaborator, path);
            }
            None => missing.push(name.to_string()),
        }
    }

    if !missing.is_empty() {
        return Err(AtlasFusionError::MissingDependency { tools: missing });
    }
    info!(tools = programs.len(), "all collaborator binaries found");
    Ok(ResolvedBinaries { programs })
}
