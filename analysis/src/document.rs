use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A snapshot of one resource's text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub path: PathBuf,
    pub language_id: String,
    pub text: Arc<str>,
}

impl Document {
    pub fn new(
        path: impl Into<PathBuf>,
        language_id: impl Into<String>,
        text: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            path: path.into(),
            language_id: language_id.into(),
            text: text.into(),
        }
    }

    /// Language taken from the file extension; `plaintext` when unknown.
    pub fn detect(path: impl Into<PathBuf>, text: impl Into<Arc<str>>) -> Self {
        let path = path.into();
        let language_id = language_for_path(&path).unwrap_or("plaintext");
        Self::new(path, language_id, text)
    }

    /// Size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.text.len()
    }

    /// Empty or whitespace only.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Language id for a file extension the backend knows how to analyze.
#[must_use]
pub fn language_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let lang = match ext.as_str() {
        "py" | "pyi" => "python",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "ts" | "tsx" | "mts" | "cts" => "typescript",
        "rs" => "rust",
        _ => return None,
    };
    Some(lang)
}
