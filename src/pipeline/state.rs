use std::fmt;

pub use crate::context::ContextBundle;
use crate::llm::Summary;
use crate::pr::types::{PrId, PrProjection};
use crate::report::ReportArtifact;

/// Model output for one PR.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryResult {
    pub pr_id: PrId,
    pub summary: Summary,
}

/// Fields of [`PipelineState`] a stage may read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateField {
    Prs,
    Context,
    Summaries,
    Reports,
    Persisted,
}

impl fmt::Display for StateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StateField::Prs => "prs",
            StateField::Context => "context",
            StateField::Summaries => "summaries",
            StateField::Reports => "reports",
            StateField::Persisted => "persisted",
        };
        f.write_str(name)
    }
}

/// Shared state threaded through one pipeline run.
///
/// Each list field is `None` until the stage that owns it writes it; an empty
/// list means the stage ran and produced nothing. Fields are only ever set,
/// never cleared.
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    pub prs: Option<Vec<PrProjection>>,
    pub context: Option<Vec<ContextBundle>>,
    pub summaries: Option<Vec<SummaryResult>>,
    pub reports: Option<Vec<ReportArtifact>>,
    pub persisted: bool,
}

impl PipelineState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `field` has been written.
    pub fn has(&self, field: StateField) -> bool {
        match field {
            StateField::Prs => self.prs.is_some(),
            StateField::Context => self.context.is_some(),
            StateField::Summaries => self.summaries.is_some(),
            StateField::Reports => self.reports.is_some(),
            StateField::Persisted => self.persisted,
        }
    }
}
