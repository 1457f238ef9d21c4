//! Editor-facing annotation types.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Severity level for an annotation. Ordered most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AnnotationSeverity {
    Error = 1,
    Warning = 2,
    Information = 3,
    Hint = 4,
}

impl AnnotationSeverity {
    /// Map a backend severity label. Case-insensitive; anything unknown is a hint.
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "error" => Self::Error,
            "warning" => Self::Warning,
            "info" | "information" => Self::Information,
            _ => Self::Hint,
        }
    }

    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::Error
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Information => "info",
            Self::Hint => "hint",
        }
    }
}

impl fmt::Display for AnnotationSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 0-indexed line and character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

/// A positioned message attached to a resource.
///
/// Fields are private; annotations come out of the translator and are
/// read through accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    range: Range,
    severity: AnnotationSeverity,
    message: String,
    source: String,
    /// Backend issue kind (`style`, `complexity`, ...).
    code: String,
    suggestion: Option<String>,
}

impl Annotation {
    #[must_use]
    pub fn new(
        range: Range,
        severity: AnnotationSeverity,
        message: String,
        source: String,
        code: String,
        suggestion: Option<String>,
    ) -> Self {
        Self {
            range,
            severity,
            message,
            source,
            code,
            suggestion,
        }
    }

    #[must_use]
    pub fn range(&self) -> Range {
        self.range
    }

    #[must_use]
    pub fn severity(&self) -> AnnotationSeverity {
        self.severity
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    #[must_use]
    pub fn suggestion(&self) -> Option<&str> {
        self.suggestion.as_deref()
    }

    /// 0-indexed start line.
    #[must_use]
    pub fn line(&self) -> u32 {
        self.range.start.line
    }

    /// Format as `path:line:col: severity: [code] message` (1-indexed for display).
    #[must_use]
    pub fn display_with_path(&self, path: &Path) -> String {
        let mut out = format!(
            "{}:{}:{}: {}: [{}] {}",
            path.display(),
            self.range.start.line + 1,
            self.range.start.character + 1,
            self.severity,
            self.code,
            self.message,
        );
        if let Some(suggestion) = &self.suggestion {
            out.push_str(&format!("\n    suggestion: {suggestion}"));
        }
        out
    }
}

/// Immutable view of every resource's annotations.
///
/// Counts are computed from `files` on demand.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsSnapshot {
    /// Sorted with error-containing files first, then by path.
    files: Vec<(PathBuf, Arc<[Annotation]>)>,
}

impl DiagnosticsSnapshot {
    pub(crate) fn new(files: Vec<(PathBuf, Arc<[Annotation]>)>) -> Self {
        Self { files }
    }

    #[must_use]
    pub fn files(&self) -> &[(PathBuf, Arc<[Annotation]>)] {
        &self.files
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn count_by_severity(&self, severity: AnnotationSeverity) -> usize {
        self.files
            .iter()
            .flat_map(|(_, items)| items.iter())
            .filter(|a| a.severity() == severity)
            .count()
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.count_by_severity(AnnotationSeverity::Error)
    }

    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.count_by_severity(AnnotationSeverity::Warning)
    }

    #[must_use]
    pub fn info_count(&self) -> usize {
        self.count_by_severity(AnnotationSeverity::Information)
    }

    #[must_use]
    pub fn hint_count(&self) -> usize {
        self.count_by_severity(AnnotationSeverity::Hint)
    }

    #[must_use]
    pub fn total_count(&self) -> usize {
        self.files.iter().map(|(_, items)| items.len()).sum()
    }

    /// Compact status string like "E:3 W:5"; empty when there is nothing to show.
    #[must_use]
    pub fn status_string(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        format!("E:{} W:{}", self.error_count(), self.warning_count())
    }
}
