pub mod types;

pub use types::{ReportArtifact, ReportRecord};

use std::fmt::Write;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::index::language_for_path;
use crate::llm::parse::strip_code_fence;
use crate::llm::Summary;
use crate::pr::types::PrProjection;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to write report file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

const NO_TLDR: &str = "- No summary available.";
const NO_FILES: &str = "- No file summaries available.";
const NO_IMPACT: &str = "No impact analysis provided.";
const NO_SNIPPET: &str = "# No snippet available";

/// Renders PR summaries to markdown and writes them under `reports_dir`.
#[derive(Debug, Clone)]
pub struct ReportRenderer {
    reports_dir: PathBuf,
}

impl ReportRenderer {
    pub fn new(reports_dir: impl Into<PathBuf>) -> Self {
        Self {
            reports_dir: reports_dir.into(),
        }
    }

    /// Deterministic location for a PR's report.
    pub fn path_for(&self, pr_number: u64) -> PathBuf {
        self.reports_dir.join(format!("PR_{}_Report.md", pr_number))
    }

    /// Format the report document. Pure; never fails on odd summary content.
    pub fn render(&self, pr: &PrProjection, summary: &Summary) -> String {
        let mut md = String::new();
        let _ = writeln!(md, "# PR #{}: {}", pr.pr_number, pr.title);
        md.push('\n');
        let _ = writeln!(
            md,
            "**Author:** {} | **URL:** {} | **Stats:** {}",
            pr.author, pr.url, pr.stats
        );

        md.push_str("\n## TL;DR\n");
        // One bullet per highlight, blank ones included.
        if summary.tldr.is_empty() {
            let _ = writeln!(md, "{}", NO_TLDR);
        } else {
            for item in &summary.tldr {
                let _ = writeln!(md, "- {}", item.trim());
            }
        }

        md.push_str("\n## Files changed (high level)\n");
        if summary.file_summaries.is_empty() {
            let _ = writeln!(md, "{}", NO_FILES);
        } else {
            for entry in &summary.file_summaries {
                let _ = writeln!(md, "{}", entry.to_bullet());
            }
        }

        md.push_str("\n## Impact / Risks\n");
        let impact = summary.impact.trim();
        let _ = writeln!(md, "{}", if impact.is_empty() { NO_IMPACT } else { impact });

        md.push_str("\n## Key code snippets / Evidence\n");
        let snippet = strip_code_fence(&summary.key_snippet);
        let snippet = if snippet.is_empty() { NO_SNIPPET } else { snippet };
        let language = pr
            .files
            .first()
            .and_then(|f| language_for_path(&f.filename))
            .unwrap_or("");
        let _ = write!(md, "```{}\n{}\n```\n", language, snippet);
        md
    }

    /// Write `markdown` to the PR's report path, replacing any previous file.
    #[instrument(skip(self, markdown), fields(pr = pr_number))]
    pub async fn persist(&self, pr_number: u64, markdown: &str) -> Result<PathBuf, ReportError> {
        let path = self.path_for(pr_number);
        tokio::fs::create_dir_all(&self.reports_dir)
            .await
            .map_err(|source| ReportError::FileWrite {
                path: self.reports_dir.clone(),
                source,
            })?;
        tokio::fs::write(&path, markdown)
            .await
            .map_err(|source| ReportError::FileWrite {
                path: path.clone(),
                source,
            })?;
        debug!(path = %path.display(), bytes = markdown.len(), "report saved");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::FileSummary;
    use crate::pr::types::{test_file, PrId};

    fn sample_pr() -> PrProjection {
        PrProjection {
            pr_id: PrId(5),
            pr_number: 42,
            title: "Add OAuth2 login flow".to_string(),
            author: "alice".to_string(),
            url: "https://github.com/org/repo/pull/42".to_string(),
            stats: "+320 / -45".to_string(),
            files: vec![test_file("auth/login.py", 320, 45)],
        }
    }

    fn sample_summary() -> Summary {
        Summary {
            tldr: vec!["Adds login".to_string(), "Adds tests".to_string()],
            file_summaries: vec![
                FileSummary::PlainText("auth/login.py: new flow".to_string()),
                FileSummary::Structured {
                    file: Some("auth/tokens.py".to_string()),
                    summary: Some("token refresh".to_string()),
                },
            ],
            impact: "Touches session handling".to_string(),
            key_snippet: "```python\ndef login(): ...\n```".to_string(),
        }
    }

    #[test]
    fn test_render_header_and_sections() {
        let renderer = ReportRenderer::new("unused");
        let md = renderer.render(&sample_pr(), &sample_summary());
        assert!(md.starts_with("# PR #42: Add OAuth2 login flow\n"));
        assert!(md.contains("**Author:** alice"));
        assert!(md.contains("**Stats:** +320 / -45"));
        assert!(md.contains("## TL;DR\n- Adds login\n- Adds tests\n"));
        assert!(md.contains("## Impact / Risks\nTouches session handling\n"));
        assert!(md.contains("```python\ndef login(): ...\n```"));
    }

    #[test]
    fn test_render_mixed_file_summaries_one_bullet_each() {
        let renderer = ReportRenderer::new("unused");
        let md = renderer.render(&sample_pr(), &sample_summary());
        let section = md
            .split("## Files changed (high level)\n")
            .nth(1)
            .unwrap()
            .split("\n\n")
            .next()
            .unwrap();
        let bullets: Vec<&str> = section.lines().collect();
        assert_eq!(
            bullets,
            vec!["- auth/login.py: new flow", "- **auth/tokens.py**: token refresh"]
        );
    }

    #[test]
    fn test_render_empty_summary_uses_placeholders() {
        let renderer = ReportRenderer::new("unused");
        let summary = Summary {
            tldr: vec![],
            file_summaries: vec![],
            impact: "  ".to_string(),
            key_snippet: String::new(),
        };
        let md = renderer.render(&sample_pr(), &summary);
        assert!(md.contains(&format!("## TL;DR\n{}\n", NO_TLDR)));
        assert!(md.contains(NO_FILES));
        assert!(md.contains(NO_IMPACT));
        assert!(md.contains(NO_SNIPPET));
    }

    #[test]
    fn test_render_one_tldr_bullet_per_entry() {
        let renderer = ReportRenderer::new("unused");
        let summary = Summary {
            tldr: vec!["first".to_string(), "  ".to_string(), "third".to_string()],
            ..sample_summary()
        };
        let md = renderer.render(&sample_pr(), &summary);
        let section = md
            .split("## TL;DR\n")
            .nth(1)
            .unwrap()
            .split("\n\n")
            .next()
            .unwrap();
        let bullets: Vec<&str> = section.lines().collect();
        assert_eq!(bullets, vec!["- first", "- ", "- third"]);
    }

    #[test]
    fn test_render_unusual_file_summary_entries() {
        let renderer = ReportRenderer::new("unused");
        let summary = Summary {
            file_summaries: vec![
                FileSummary::Structured {
                    file: Some("a.py".to_string()),
                    summary: Some("added x; removed y".to_string()),
                },
                FileSummary::Other(serde_json::json!(42)),
            ],
            ..sample_summary()
        };
        let md = renderer.render(&sample_pr(), &summary);
        assert!(md.contains("## Files changed (high level)\n- **a.py**: added x; removed y\n- 42\n"));
    }

    #[test]
    fn test_path_for() {
        let renderer = ReportRenderer::new("/tmp/reports");
        assert_eq!(
            renderer.path_for(17),
            PathBuf::from("/tmp/reports/PR_17_Report.md")
        );
    }

    #[tokio::test]
    async fn test_persist_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = ReportRenderer::new(dir.path().join("nested"));

        let first = renderer.persist(42, "first version, longer text").await.unwrap();
        let second = renderer.persist(42, "second").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(std::fs::read_to_string(&second).unwrap(), "second");
        assert_eq!(second.file_name().unwrap(), "PR_42_Report.md");
    }
}
