use std::future::Future;
use std::pin::Pin;

use aura_client::BackendApi;
use aura_protocol::{Issue, RequestError};

use crate::document::Document;

pub type AnalyzeFut<'a> = Pin<Box<dyn Future<Output = Result<Vec<Issue>, RequestError>> + Send + 'a>>;

/// Where the scheduler sends documents for analysis.
pub trait AnalysisBackend: Send + Sync + 'static {
    fn analyze<'a>(&'a self, document: &'a Document) -> AnalyzeFut<'a>;
}

impl AnalysisBackend for BackendApi {
    fn analyze<'a>(&'a self, document: &'a Document) -> AnalyzeFut<'a> {
        Box::pin(async move {
            let analysis = self
                .analyze_file(&document.path, &document.text, &document.language_id)
                .await?;
            Ok(analysis.issues)
        })
    }
}
