//! Fixed five-stage report pipeline.
//!
//! `fetch_metadata -> collect_context -> summarize -> render_report -> persist`.
//! Stages share one [`PipelineState`]; each declares the fields it reads and
//! writes, and the orchestrator refuses to start a stage whose inputs are not
//! there yet. Any stage error aborts the run.

pub mod stages;
pub mod state;

pub use stages::{CollectContext, FetchMetadata, Persist, RenderReport, Summarize};
pub use state::{PipelineState, StateField};

use async_trait::async_trait;
use colored::Colorize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, info_span, Instrument};

use crate::config::PipelineConfig;
use crate::context::ContextRetriever;
use crate::index::IndexError;
use crate::llm::{GenerationError, GenerativeClient};
use crate::pr::types::PrId;
use crate::report::{ReportError, ReportRenderer};
use crate::store::{PrStore, StoreError};

#[derive(Debug, Error)]
pub enum StageError {
    #[error("Required input '{field}' has not been written")]
    MissingInput { field: StateField },

    #[error("Stage finished without writing '{field}'")]
    MissingOutput { field: StateField },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Context retrieval failed for PR #{pr_number}: {source}")]
    Index {
        pr_number: u64,
        #[source]
        source: IndexError,
    },

    #[error("Summary generation failed for PR #{pr_number} (id {pr_id}): {source}")]
    Generation {
        pr_id: PrId,
        pr_number: u64,
        #[source]
        source: GenerationError,
    },

    #[error("No {missing} for PR id {pr_id}")]
    Correlation { pr_id: PrId, missing: &'static str },

    #[error("Failed to save report for PR #{pr_number}: {source}")]
    Report {
        pr_number: u64,
        #[source]
        source: ReportError,
    },
}

/// A run aborted inside `stage`.
#[derive(Debug, Error)]
#[error("Pipeline failed at stage {stage_index} ({stage}): {source}")]
pub struct PipelineError {
    pub stage: &'static str,
    pub stage_index: usize,
    #[source]
    pub source: StageError,
}

/// One unit of the pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fields that must be present before `run`.
    fn reads(&self) -> &'static [StateField];

    /// Fields `run` is expected to populate.
    fn writes(&self) -> &'static [StateField];

    async fn run(&self, state: &mut PipelineState) -> Result<(), StageError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    NotStarted,
    Running { stage_index: usize },
    Completed,
    Failed { stage_index: usize, cause: String },
}

/// Collaborators the standard stages are built from.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn PrStore>,
    pub retriever: ContextRetriever,
    pub generator: GenerativeClient,
    pub renderer: ReportRenderer,
}

pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    status: RunStatus,
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self {
            stages,
            status: RunStatus::NotStarted,
        }
    }

    /// The five report stages in their fixed order.
    pub fn standard(services: Services, config: &PipelineConfig) -> Self {
        Self::new(vec![
            Box::new(FetchMetadata {
                store: services.store.clone(),
            }),
            Box::new(CollectContext {
                retriever: services.retriever,
                concurrency: config.concurrency,
            }),
            Box::new(Summarize {
                generator: services.generator,
                concurrency: config.concurrency,
                max_diff_files: config.max_diff_files,
                diff_char_budget: config.diff_char_budget,
            }),
            Box::new(RenderReport {
                renderer: services.renderer,
            }),
            Box::new(Persist { store: services.store }),
        ])
    }

    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage in order on a fresh state and return the final state.
    pub async fn run(&mut self) -> Result<PipelineState, PipelineError> {
        let mut state = PipelineState::new();
        let total = self.stages.len();

        for (index, stage) in self.stages.iter().enumerate() {
            self.status = RunStatus::Running { stage_index: index };
            println!(
                "{} {}",
                format!("[{}/{}]", index + 1, total).dimmed(),
                stage.name().cyan().bold()
            );

            let result = async {
                if let Some(field) = stage.reads().iter().find(|f| !state.has(**f)) {
                    return Err(StageError::MissingInput { field: *field });
                }
                stage.run(&mut state).await?;
                if let Some(field) = stage.writes().iter().find(|f| !state.has(**f)) {
                    return Err(StageError::MissingOutput { field: *field });
                }
                Ok::<(), StageError>(())
            }
            .instrument(info_span!("stage", name = stage.name(), index))
            .await;

            if let Err(source) = result {
                error!(stage = stage.name(), error = %source, "stage failed");
                println!("  {} {}", "failed:".red().bold(), source);
                self.status = RunStatus::Failed {
                    stage_index: index,
                    cause: source.to_string(),
                };
                return Err(PipelineError {
                    stage: stage.name(),
                    stage_index: index,
                    source,
                });
            }
            println!("  {}", "done".green());
        }

        self.status = RunStatus::Completed;
        info!(stages = total, "pipeline completed");
        Ok(state)
    }
}
