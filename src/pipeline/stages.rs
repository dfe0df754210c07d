use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;
use tracing::{debug, info};

use super::state::{ContextBundle, PipelineState, StateField, SummaryResult};
use super::{Stage, StageError};
use crate::context::ContextRetriever;
use crate::llm::GenerativeClient;
use crate::pr::types::{PrId, PrProjection};
use crate::report::{ReportArtifact, ReportRecord, ReportRenderer};
use crate::store::PrStore;

fn require<'a, T>(value: &'a Option<Vec<T>>, field: StateField) -> Result<&'a [T], StageError> {
    value.as_deref().ok_or(StageError::MissingInput { field })
}

/// Loads every stored PR and projects it for the later stages.
pub struct FetchMetadata {
    pub store: Arc<dyn PrStore>,
}

#[async_trait]
impl Stage for FetchMetadata {
    fn name(&self) -> &'static str {
        "fetch_metadata"
    }

    fn reads(&self) -> &'static [StateField] {
        &[]
    }

    fn writes(&self) -> &'static [StateField] {
        &[StateField::Prs]
    }

    async fn run(&self, state: &mut PipelineState) -> Result<(), StageError> {
        let records = self.store.list_all_prs().await?;
        let prs: Vec<PrProjection> = records.iter().filter_map(PrProjection::from_record).collect();
        info!(count = prs.len(), "loaded PR metadata");
        state.prs = Some(prs);
        Ok(())
    }
}

/// Purpose and impact context for every PR.
pub struct CollectContext {
    pub retriever: ContextRetriever,
    pub concurrency: usize,
}

#[async_trait]
impl Stage for CollectContext {
    fn name(&self) -> &'static str {
        "collect_context"
    }

    fn reads(&self) -> &'static [StateField] {
        &[StateField::Prs]
    }

    fn writes(&self) -> &'static [StateField] {
        &[StateField::Context]
    }

    async fn run(&self, state: &mut PipelineState) -> Result<(), StageError> {
        let prs = require(&state.prs, StateField::Prs)?;
        let retriever = &self.retriever;

        let tasks: Vec<_> = prs
            .iter()
            .map(|pr| async move {
                retriever
                    .collect(pr)
                    .await
                    .map_err(|source| StageError::Index {
                        pr_number: pr.pr_number,
                        source,
                    })
            })
            .collect();

        let bundles: Vec<ContextBundle> = stream::iter(tasks)
            .buffered(self.concurrency.max(1))
            .try_collect()
            .await?;

        info!(count = bundles.len(), "collected context");
        state.context = Some(bundles);
        Ok(())
    }
}

/// One model summary per PR.
pub struct Summarize {
    pub generator: GenerativeClient,
    pub concurrency: usize,
    /// Only the first this-many file patches go into the prompt
    pub max_diff_files: usize,
    /// Character cap on the concatenated patch text
    pub diff_char_budget: usize,
}

#[async_trait]
impl Stage for Summarize {
    fn name(&self) -> &'static str {
        "summarize"
    }

    fn reads(&self) -> &'static [StateField] {
        &[StateField::Prs, StateField::Context]
    }

    fn writes(&self) -> &'static [StateField] {
        &[StateField::Summaries]
    }

    async fn run(&self, state: &mut PipelineState) -> Result<(), StageError> {
        let prs = require(&state.prs, StateField::Prs)?;
        let context = require(&state.context, StateField::Context)?;
        let by_id: HashMap<PrId, &ContextBundle> = context.iter().map(|c| (c.pr_id, c)).collect();

        // Resolve every pairing before the first model call.
        let jobs = prs
            .iter()
            .map(|pr| {
                by_id
                    .get(&pr.pr_id)
                    .map(|ctx| (pr, *ctx))
                    .ok_or(StageError::Correlation {
                        pr_id: pr.pr_id,
                        missing: "context bundle",
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let generator = &self.generator;
        let tasks: Vec<_> = jobs
            .into_iter()
            .map(|(pr, ctx)| {
                let prompt = build_prompt(pr, ctx, self.max_diff_files, self.diff_char_budget);
                async move {
                    debug!(pr = pr.pr_number, prompt_chars = prompt.len(), "requesting summary");
                    generator
                        .generate_structured(&prompt)
                        .await
                        .map(|summary| SummaryResult {
                            pr_id: pr.pr_id,
                            summary,
                        })
                        .map_err(|source| StageError::Generation {
                            pr_id: pr.pr_id,
                            pr_number: pr.pr_number,
                            source,
                        })
                }
            })
            .collect();

        let summaries: Vec<SummaryResult> = stream::iter(tasks)
            .buffered(self.concurrency.max(1))
            .try_collect()
            .await?;

        info!(count = summaries.len(), "summarized PRs");
        state.summaries = Some(summaries);
        Ok(())
    }
}

/// Prompt for one PR: metadata, retrieved context and a bounded slice of the diff.
pub fn build_prompt(pr: &PrProjection, ctx: &ContextBundle, max_diff_files: usize, diff_char_budget: usize) -> String {
    let mut diff_text = String::new();
    for file in pr.files.iter().take(max_diff_files) {
        if let Some(patch) = file.patch.as_deref().filter(|p| !p.is_empty()) {
            let _ = write!(diff_text, "\nFile: {}\n{}\n", file.filename, patch);
        }
    }

    format!(
        "You are generating a PR report.\n\n\
         METADATA:\n\
         Title: {title}\n\
         Files Changed: {files:?}\n\n\
         CONTEXT:\n\
         File Purposes: {purpose:?}\n\
         Impact Analysis: {impact:?}\n\n\
         CODE DIFFS:\n\
         {diff}\n\n\
         TASK:\n\
         Return valid JSON with keys: \"tldr\" (list), \"file_summaries\" (list), \
         \"impact\" (string), \"key_snippet\" (string code block content).\n",
        title = pr.title,
        files = pr.filenames(),
        purpose = ctx.purpose,
        impact = ctx.impact,
        diff = truncate_chars(&diff_text, diff_char_budget),
    )
}

/// First `max` chars of `text`.
fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Renders each PR's summary to markdown and saves it to disk.
pub struct RenderReport {
    pub renderer: ReportRenderer,
}

#[async_trait]
impl Stage for RenderReport {
    fn name(&self) -> &'static str {
        "render_report"
    }

    fn reads(&self) -> &'static [StateField] {
        &[StateField::Prs, StateField::Summaries]
    }

    fn writes(&self) -> &'static [StateField] {
        &[StateField::Reports]
    }

    async fn run(&self, state: &mut PipelineState) -> Result<(), StageError> {
        let prs = require(&state.prs, StateField::Prs)?;
        let summaries = require(&state.summaries, StateField::Summaries)?;
        let by_id: HashMap<PrId, &SummaryResult> = summaries.iter().map(|s| (s.pr_id, s)).collect();

        let mut reports = Vec::with_capacity(prs.len());
        for pr in prs {
            let result = by_id.get(&pr.pr_id).ok_or(StageError::Correlation {
                pr_id: pr.pr_id,
                missing: "summary",
            })?;
            let markdown = self.renderer.render(pr, &result.summary);
            let location = self
                .renderer
                .persist(pr.pr_number, &markdown)
                .await
                .map_err(|source| StageError::Report {
                    pr_number: pr.pr_number,
                    source,
                })?;
            debug!(pr = pr.pr_number, path = %location.display(), "report written");
            reports.push(ReportArtifact {
                pr_id: pr.pr_id,
                pr_number: pr.pr_number,
                markdown,
                location,
            });
        }

        info!(count = reports.len(), "rendered reports");
        state.reports = Some(reports);
        Ok(())
    }
}

/// Upserts every rendered report, then marks the run persisted.
pub struct Persist {
    pub store: Arc<dyn PrStore>,
}

#[async_trait]
impl Stage for Persist {
    fn name(&self) -> &'static str {
        "persist"
    }

    fn reads(&self) -> &'static [StateField] {
        &[StateField::Reports]
    }

    fn writes(&self) -> &'static [StateField] {
        &[StateField::Persisted]
    }

    async fn run(&self, state: &mut PipelineState) -> Result<(), StageError> {
        let reports = require(&state.reports, StateField::Reports)?;
        let records: Vec<ReportRecord> = reports.iter().map(ReportRecord::from).collect();
        self.store.upsert_reports(&records).await?;
        info!(count = records.len(), "persisted reports");
        state.persisted = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::{RecordingSleeper, ScriptedGenerator, SUMMARY_JSON};
    use crate::llm::RetryPolicy;
    use crate::pr::types::test_file;
    use std::time::Duration;

    fn projection(id: i64, number: u64, files: usize) -> PrProjection {
        PrProjection {
            pr_id: PrId(id),
            pr_number: number,
            title: format!("PR {}", number),
            author: "alice".to_string(),
            url: format!("https://github.com/org/repo/pull/{}", number),
            stats: "+1 / -1".to_string(),
            files: (0..files).map(|i| test_file(&format!("src/f{}.rs", i), 1, 1)).collect(),
        }
    }

    fn bundle(id: i64) -> ContextBundle {
        ContextBundle {
            pr_id: PrId(id),
            purpose: vec!["fn purpose() {}".to_string()],
            impact: vec!["use crate::f0;".to_string()],
        }
    }

    fn summarize_with(replies: Vec<Result<String, crate::llm::LlmError>>) -> (Summarize, Arc<ScriptedGenerator>) {
        let generator = Arc::new(ScriptedGenerator::new(replies));
        let policy = RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::from_millis(1),
            multiplier: None,
            max_delay: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(5),
        };
        let client = GenerativeClient::new(generator.clone(), policy, "test-model", 0.2)
            .with_sleeper(Arc::new(RecordingSleeper::default()));
        let stage = Summarize {
            generator: client,
            concurrency: 2,
            max_diff_files: 3,
            diff_char_budget: 6_000,
        };
        (stage, generator)
    }

    #[test]
    fn test_prompt_uses_first_three_diffs() {
        let prompt = build_prompt(&projection(1, 1, 5), &bundle(1), 3, 6_000);
        assert!(prompt.contains("File: src/f0.rs"));
        assert!(prompt.contains("File: src/f2.rs"));
        assert!(!prompt.contains("File: src/f3.rs"));
        // every filename is still listed in the metadata section
        assert!(prompt.contains("\"src/f4.rs\""));
        assert!(prompt.contains("fn purpose() {}"));
        assert!(prompt.contains("\"tldr\" (list)"));
    }

    #[test]
    fn test_prompt_diff_is_truncated() {
        let prompt = build_prompt(&projection(1, 1, 3), &bundle(1), 3, 10);
        assert!(prompt.contains("CODE DIFFS:\n\nFile: src\n\nTASK:"));
    }

    #[test]
    fn test_truncate_chars_on_char_boundary() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }

    #[tokio::test]
    async fn test_summarize_keeps_pr_order_and_ids() {
        let (stage, generator) = summarize_with(vec![Ok(SUMMARY_JSON.to_string()), Ok(SUMMARY_JSON.to_string())]);
        let mut state = PipelineState {
            prs: Some(vec![projection(1, 10, 1), projection(2, 20, 1)]),
            // deliberately reversed
            context: Some(vec![bundle(2), bundle(1)]),
            ..Default::default()
        };
        stage.run(&mut state).await.unwrap();

        let summaries = state.summaries.unwrap();
        assert_eq!(summaries.iter().map(|s| s.pr_id).collect::<Vec<_>>(), vec![PrId(1), PrId(2)]);
        assert_eq!(generator.call_count(), 2);
    }

    #[tokio::test]
    async fn test_summarize_missing_context_is_correlation_error() {
        let (stage, generator) = summarize_with(vec![Ok(SUMMARY_JSON.to_string())]);
        let mut state = PipelineState {
            prs: Some(vec![projection(1, 10, 1), projection(2, 20, 1)]),
            context: Some(vec![bundle(1)]),
            ..Default::default()
        };
        let err = stage.run(&mut state).await.unwrap_err();
        assert!(matches!(
            err,
            StageError::Correlation {
                pr_id: PrId(2),
                missing: "context bundle"
            }
        ));
        assert_eq!(generator.call_count(), 0);
        assert!(state.summaries.is_none());
    }

    #[tokio::test]
    async fn test_render_missing_summary_is_correlation_error() {
        let dir = tempfile::tempdir().unwrap();
        let stage = RenderReport {
            renderer: ReportRenderer::new(dir.path()),
        };
        let mut state = PipelineState {
            prs: Some(vec![projection(1, 10, 1)]),
            summaries: Some(Vec::new()),
            ..Default::default()
        };
        let err = stage.run(&mut state).await.unwrap_err();
        assert!(matches!(err, StageError::Correlation { pr_id: PrId(1), .. }));
    }
}
