//! Turning editor changes into backend analyses, and analyses into annotations.

pub mod backend;
pub mod diagnostics;
pub mod document;
pub mod scheduler;
pub mod settings;
pub mod types;

pub use backend::{AnalysisBackend, AnalyzeFut};
pub use diagnostics::{ANNOTATION_SOURCE, DiagnosticsTranslator};
pub use document::{Document, language_for_path};
pub use scheduler::{
    AnalysisOutcome, AnalysisScheduler, ChangeDisposition, SchedulerEvent, SkipReason, SweepReport,
};
pub use settings::{DebounceTier, SchedulerSettings};
pub use types::{Annotation, AnnotationSeverity, DiagnosticsSnapshot, Position, Range};
