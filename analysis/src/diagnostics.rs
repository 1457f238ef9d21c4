//! Diagnostics translator: backend issues in, per-resource annotation sets out.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use aura_protocol::Issue;

use crate::types::{Annotation, AnnotationSeverity, DiagnosticsSnapshot, Position, Range};

/// `source` on every annotation this translator produces.
pub const ANNOTATION_SOURCE: &str = "core";

/// Ranges run to the end of the line; editors clamp this to the line length.
const LINE_END: u32 = u32::MAX;

/// Owns the annotation set of every resource.
///
/// A resource's set is replaced with a single map write, so readers see
/// either the old set or the new one, never a mix.
#[derive(Debug, Default)]
pub struct DiagnosticsTranslator {
    data: RwLock<HashMap<PathBuf, Arc<[Annotation]>>>,
}

impl DiagnosticsTranslator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert issues to annotations, most severe first, then by position.
    #[must_use]
    pub fn translate(issues: &[Issue]) -> Vec<Annotation> {
        let mut annotations: Vec<Annotation> = issues.iter().map(annotation_from_issue).collect();
        annotations.sort_by(|a, b| {
            a.severity()
                .cmp(&b.severity())
                .then_with(|| a.range().cmp(&b.range()))
        });
        annotations
    }

    /// Replace the annotation set for `path`. An empty set removes the entry.
    pub fn apply(&self, path: &Path, issues: &[Issue]) -> Arc<[Annotation]> {
        let annotations: Arc<[Annotation]> = Self::translate(issues).into();
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        if annotations.is_empty() {
            data.remove(path);
        } else {
            data.insert(path.to_path_buf(), Arc::clone(&annotations));
        }
        drop(data);
        tracing::debug!(
            path = %path.display(),
            count = annotations.len(),
            "Annotations replaced"
        );
        annotations
    }

    /// Returns whether `path` had annotations.
    pub fn clear(&self, path: &Path) -> bool {
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path)
            .is_some()
    }

    pub fn clear_all(&self) {
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Current set for `path`; empty when none.
    #[must_use]
    pub fn annotations(&self, path: &Path) -> Arc<[Annotation]> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
            .unwrap_or_else(|| Arc::from(Vec::new()))
    }

    #[must_use]
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let mut files: Vec<(PathBuf, Arc<[Annotation]>)> = self
            .data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(path, items)| (path.clone(), Arc::clone(items)))
            .collect();

        // Files with errors first, then alphabetically
        files.sort_by(|a, b| {
            let a_has_errors = a.1.iter().any(|d| d.severity().is_error());
            let b_has_errors = b.1.iter().any(|d| d.severity().is_error());
            b_has_errors.cmp(&a_has_errors).then_with(|| a.0.cmp(&b.0))
        });

        DiagnosticsSnapshot::new(files)
    }
}

fn annotation_from_issue(issue: &Issue) -> Annotation {
    let line = clamp_u32(issue.line.saturating_sub(1));
    let character = clamp_u32(issue.column.unwrap_or(0));
    Annotation::new(
        Range {
            start: Position { line, character },
            end: Position {
                line,
                character: LINE_END,
            },
        },
        AnnotationSeverity::from_label(&issue.severity),
        issue.message.clone(),
        ANNOTATION_SOURCE.to_string(),
        issue.kind.clone(),
        issue.suggestion.clone(),
    )
}

fn clamp_u32(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(line: i64, severity: &str, message: &str) -> Issue {
        Issue {
            line,
            column: None,
            kind: "style".to_string(),
            severity: severity.to_string(),
            message: message.to_string(),
            suggestion: None,
        }
    }

    #[test]
    fn converts_one_based_lines_and_clamps() {
        let out = DiagnosticsTranslator::translate(&[
            issue(1, "error", "first"),
            issue(0, "error", "zero"),
            issue(-5, "error", "negative"),
        ]);
        let lines: Vec<u32> = out.iter().map(Annotation::line).collect();
        assert_eq!(lines, vec![0, 0, 0]);
    }

    #[test]
    fn maps_fields_onto_annotation() {
        let mut raw = issue(12, "Warning", "line too long");
        raw.column = Some(-3);
        raw.kind = "complexity".to_string();
        raw.suggestion = Some("split it".to_string());

        let out = DiagnosticsTranslator::translate(&[raw]);
        let a = &out[0];
        assert_eq!(a.line(), 11);
        assert_eq!(a.range().start.character, 0);
        assert_eq!(a.range().end.character, LINE_END);
        assert_eq!(a.severity(), AnnotationSeverity::Warning);
        assert_eq!(a.source(), ANNOTATION_SOURCE);
        assert_eq!(a.code(), "complexity");
        assert_eq!(a.suggestion(), Some("split it"));
    }

    #[test]
    fn orders_by_severity_then_position() {
        let out = DiagnosticsTranslator::translate(&[
            issue(9, "hint", "h"),
            issue(5, "warning", "w5"),
            issue(2, "warning", "w2"),
            issue(7, "error", "e"),
        ]);
        let messages: Vec<&str> = out.iter().map(Annotation::message).collect();
        assert_eq!(messages, vec!["e", "w2", "w5", "h"]);
    }

    #[test]
    fn apply_replaces_whole_set() {
        let translator = DiagnosticsTranslator::new();
        let path = Path::new("/w/a.py");
        translator.apply(path, &[issue(1, "error", "a"), issue(2, "error", "b")]);
        assert_eq!(translator.annotations(path).len(), 2);

        translator.apply(path, &[issue(3, "warning", "c")]);
        let current = translator.annotations(path);
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].message(), "c");
    }

    #[test]
    fn earlier_readers_keep_their_set() {
        let translator = DiagnosticsTranslator::new();
        let path = Path::new("/w/a.py");
        translator.apply(path, &[issue(1, "error", "old")]);
        let held = translator.annotations(path);

        translator.apply(path, &[issue(1, "error", "new")]);
        assert_eq!(held[0].message(), "old");
        assert_eq!(translator.annotations(path)[0].message(), "new");
    }

    #[test]
    fn empty_apply_and_clear_remove_resource() {
        let translator = DiagnosticsTranslator::new();
        let a = Path::new("/w/a.py");
        let b = Path::new("/w/b.py");
        translator.apply(a, &[issue(1, "error", "x")]);
        translator.apply(b, &[issue(1, "error", "y")]);

        translator.apply(a, &[]);
        assert!(translator.annotations(a).is_empty());
        assert!(translator.clear(b));
        assert!(!translator.clear(b));
        assert!(translator.snapshot().is_empty());
    }

    #[test]
    fn clear_all_empties_store() {
        let translator = DiagnosticsTranslator::new();
        translator.apply(Path::new("/w/a.py"), &[issue(1, "error", "x")]);
        translator.apply(Path::new("/w/b.py"), &[issue(1, "info", "y")]);
        translator.clear_all();
        assert!(translator.snapshot().is_empty());
    }

    #[test]
    fn snapshot_puts_error_files_first() {
        let translator = DiagnosticsTranslator::new();
        translator.apply(Path::new("/w/a.py"), &[issue(1, "warning", "w")]);
        translator.apply(Path::new("/w/b.py"), &[issue(1, "error", "e")]);

        let snap = translator.snapshot();
        assert_eq!(snap.files()[0].0, PathBuf::from("/w/b.py"));
        assert_eq!(snap.files()[1].0, PathBuf::from("/w/a.py"));
        assert_eq!(snap.status_string(), "E:1 W:1");
    }
}
