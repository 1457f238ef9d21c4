//! Wire-level protocol spoken between the editor bridge and the Aura backend.

pub mod codec;
pub mod envelope;
pub mod error;
pub mod reply;

pub use envelope::{Envelope, EnvelopeKind, Incoming, ResponseBody, parse_incoming};
pub use error::{ConnectionError, ProtocolError, RequestError};
pub use reply::{
    AnalysisMetrics, CommitSuggestion, Completion, FileAnalysis, HealthReport, Issue, Reply,
    ServiceStatus,
};
