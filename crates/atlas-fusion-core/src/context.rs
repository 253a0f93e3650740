//! Per-subject working state for one scheme pass.

use crate::domain::{LabelScheme, Subject};
use crate::naming::SubjectLayout;
use crate::selector::MatchedAtlas;

/// Everything the stages need while processing one subject under one scheme.
///
/// Built fresh for every (subject, scheme) pair and dropped afterwards; it is
/// never shared between subjects.
#[derive(Debug, Clone)]
pub struct SubjectContext {
    pub subject: Subject,
    pub age: i32,
    pub scheme: LabelScheme,
    pub layout: SubjectLayout,
    pub matched: Vec<MatchedAtlas>,
}

impl SubjectContext {
    pub fn new(
        subject: Subject,
        age: i32,
        scheme: LabelScheme,
        layout: SubjectLayout,
        matched: Vec<MatchedAtlas>,
    ) -> Self {
        Self {
            subject,
            age,
            scheme,
            layout,
            matched,
        }
    }

    pub fn name(&self) -> &str {
        &self.subject.name
    }
}
