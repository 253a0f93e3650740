//! Data model: subjects, reference atlases and label schemes.
//!
//! Everything here is loaded once at startup and treated as read-only for
//! the rest of the run.

pub mod atlas;
pub mod scheme;
pub mod subject;

pub use atlas::{AtlasEntry, AtlasLibrary};
pub use scheme::LabelScheme;
pub use subject::{duplicate_subject_names, parse_subject_line, Subject, SubjectManifest};
