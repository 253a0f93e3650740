//! Process-backed collaborators for atlas-fusion.
//!
//! Resolves the external image-processing binaries, builds their command
//! lines and runs them as child processes behind the core `Toolkit` trait.

pub mod command;
pub mod deps;
pub mod runner;
pub mod toolkit;

pub use command::{Collaborator, CommandSpec};
pub use deps::{check_dependencies, check_dependencies_in, resolve_binary, ResolvedBinaries};
pub use runner::CommandRunner;
pub use toolkit::{parse_volume, ProcessToolkit};
