use std::sync::Arc;
use tracing::{debug, instrument};

use crate::index::{IndexError, SemanticIndex};
use crate::pr::types::{PrId, PrProjection};

/// Retrieved code context for one PR.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextBundle {
    pub pr_id: PrId,
    /// Snippets explaining what the changed files are for
    pub purpose: Vec<String>,
    /// Snippets from code that depends on the changed files
    pub impact: Vec<String>,
}

pub fn purpose_query(filenames: &[&str]) -> String {
    format!("Explain the high-level purpose of these files: {:?}", filenames)
}

pub fn impact_query(filenames: &[&str]) -> String {
    format!("Find code that imports or calls functions from: {:?}", filenames)
}

/// Read-only view over the semantic index.
#[derive(Clone)]
pub struct ContextRetriever {
    index: Arc<dyn SemanticIndex>,
    top_k: usize,
}

impl ContextRetriever {
    pub fn new(index: Arc<dyn SemanticIndex>, top_k: usize) -> Self {
        Self { index, top_k }
    }

    /// Text of the `top_k` best-matching snippets.
    pub async fn find_context(&self, query: &str, top_k: usize) -> Result<Vec<String>, IndexError> {
        let hits = self.index.semantic_search(query, top_k, None).await?;
        Ok(hits.into_iter().map(|hit| hit.text).collect())
    }

    /// Run the purpose and impact queries for `pr`.
    #[instrument(skip(self, pr), fields(pr = pr.pr_number))]
    pub async fn collect(&self, pr: &PrProjection) -> Result<ContextBundle, IndexError> {
        let filenames = pr.filenames();
        let purpose = self.find_context(&purpose_query(&filenames), self.top_k).await?;
        let impact = self.find_context(&impact_query(&filenames), self.top_k).await?;
        debug!(purpose = purpose.len(), impact = impact.len(), "collected context");
        Ok(ContextBundle {
            pr_id: pr.pr_id,
            purpose,
            impact,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::sqlite::test_index;
    use crate::index::SourceDocument;
    use crate::pr::types::test_file;
    use crate::store::sqlite::test_store;

    fn doc(path: &str, text: &str) -> SourceDocument {
        SourceDocument {
            repo: "org/repo".to_string(),
            file_path: path.to_string(),
            language: "rust".to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_query_builders_list_filenames() {
        let files = ["src/a.rs", "src/b.rs"];
        assert_eq!(
            purpose_query(&files),
            r#"Explain the high-level purpose of these files: ["src/a.rs", "src/b.rs"]"#
        );
        assert_eq!(
            impact_query(&files),
            r#"Find code that imports or calls functions from: ["src/a.rs", "src/b.rs"]"#
        );
    }

    #[tokio::test]
    async fn test_collect_respects_top_k() {
        let store = test_store().await;
        let index = test_index(store.pool().clone());
        index
            .index_documents(&[
                doc("src/a.rs", "fn a() {}"),
                doc("src/b.rs", "fn b() {}"),
                doc("src/c.rs", "fn c() {}"),
            ])
            .await
            .unwrap();

        let retriever = ContextRetriever::new(Arc::new(index), 2);
        let pr = PrProjection {
            pr_id: PrId(9),
            pr_number: 3,
            title: "t".to_string(),
            author: "a".to_string(),
            url: "u".to_string(),
            stats: "+1 / -0".to_string(),
            files: vec![test_file("src/a.rs", 1, 0)],
        };

        let bundle = retriever.collect(&pr).await.unwrap();
        assert_eq!(bundle.pr_id, PrId(9));
        assert_eq!(bundle.purpose.len(), 2);
        assert_eq!(bundle.impact.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_index_yields_empty_buckets() {
        let store = test_store().await;
        let retriever = ContextRetriever::new(Arc::new(test_index(store.pool().clone())), 3);
        assert!(retriever.find_context("anything", 3).await.unwrap().is_empty());
    }
}
