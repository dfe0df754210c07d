use std::path::PathBuf;

use crate::pr::types::PrId;

/// A rendered report held in pipeline state until it is persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportArtifact {
    pub pr_id: PrId,
    pub pr_number: u64,
    /// Full markdown document
    pub markdown: String,
    /// Where the document was written
    pub location: PathBuf,
}

/// Stored report row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRecord {
    /// Always `report-{pr_id}`
    pub id: String,
    pub pr_id: PrId,
    pub report_markdown: String,
    pub file_path: String,
}

impl ReportRecord {
    pub fn new(pr_id: PrId, report_markdown: String, file_path: String) -> Self {
        Self {
            id: Self::id_for(pr_id),
            pr_id,
            report_markdown,
            file_path,
        }
    }

    /// Deterministic report id, so re-persisting a PR's report replaces the old row.
    pub fn id_for(pr_id: PrId) -> String {
        format!("report-{}", pr_id)
    }
}

impl From<&ReportArtifact> for ReportRecord {
    fn from(artifact: &ReportArtifact) -> Self {
        ReportRecord::new(
            artifact.pr_id,
            artifact.markdown.clone(),
            artifact.location.display().to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_id_is_deterministic() {
        assert_eq!(ReportRecord::id_for(PrId(12)), "report-12");
        let a = ReportRecord::new(PrId(12), "a".to_string(), "x".to_string());
        let b = ReportRecord::new(PrId(12), "b".to_string(), "y".to_string());
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn test_record_from_artifact() {
        let artifact = ReportArtifact {
            pr_id: PrId(3),
            pr_number: 17,
            markdown: "# PR #17".to_string(),
            location: PathBuf::from("reports/PR_17_Report.md"),
        };
        let record = ReportRecord::from(&artifact);
        assert_eq!(record.id, "report-3");
        assert_eq!(record.pr_id, PrId(3));
        assert_eq!(record.report_markdown, "# PR #17");
        assert_eq!(record.file_path, "reports/PR_17_Report.md");
    }
}
