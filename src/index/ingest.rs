use tracing::{info, instrument, warn};

use super::{language_for_path, IndexError, SemanticIndex, SourceDocument};
use crate::github::CodeHost;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodebaseIngestSummary {
    pub files_indexed: usize,
    pub chunks_written: usize,
    /// Supported files whose contents could not be fetched
    pub files_skipped: Vec<String>,
}

/// Index every supported source file of `repo` at `branch`.
///
/// Files are fetched and indexed one at a time; a file that cannot be fetched
/// is logged and skipped, while an indexing failure aborts the run.
#[instrument(skip(host, index), fields(repo = %repo, branch = %branch))]
pub async fn ingest_codebase(
    host: &dyn CodeHost,
    index: &dyn SemanticIndex,
    repo: &str,
    branch: &str,
) -> Result<CodebaseIngestSummary, IndexError> {
    let tree = host.repo_tree(repo, branch).await?;
    let candidates: Vec<(&str, &'static str)> = tree
        .iter()
        .filter(|entry| entry.is_blob())
        .filter_map(|entry| language_for_path(&entry.path).map(|lang| (entry.path.as_str(), lang)))
        .collect();
    info!(total = tree.len(), supported = candidates.len(), "walked repository tree");

    let mut summary = CodebaseIngestSummary::default();
    for (path, language) in candidates {
        let text = match host.fetch_file(repo, branch, path).await {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %path, error = %e, "could not fetch file, skipping");
                summary.files_skipped.push(path.to_string());
                continue;
            }
        };

        let doc = SourceDocument {
            repo: repo.to_string(),
            file_path: path.to_string(),
            language: language.to_string(),
            text,
        };
        summary.chunks_written += index.index_documents(std::slice::from_ref(&doc)).await?;
        summary.files_indexed += 1;
    }

    info!(
        files = summary.files_indexed,
        chunks = summary.chunks_written,
        skipped = summary.files_skipped.len(),
        "codebase ingestion complete"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::testing::FakeHost;
    use crate::index::sqlite::test_index;
    use crate::store::sqlite::test_store;

    #[tokio::test]
    async fn test_ingest_indexes_supported_blobs_only() {
        let mut host = FakeHost::default();
        host.add_tree_file("src/app.py", "def run():\n    serve requests");
        host.add_tree_file("web/main.ts", "export function boot() {}");
        host.add_tree_file("README.md", "# docs");
        host.add_tree_dir("src");
        host.add_tree_missing("src/broken.go");

        let store = test_store().await;
        let index = test_index(store.pool().clone());
        let summary = ingest_codebase(&host, &index, "org/repo", "main").await.unwrap();

        assert_eq!(summary.files_indexed, 2);
        assert_eq!(summary.chunks_written, 2);
        assert_eq!(summary.files_skipped, vec!["src/broken.go".to_string()]);

        let hits = index.semantic_search("serve requests", 1, None).await.unwrap();
        assert_eq!(hits[0].metadata.file_path, "src/app.py");
        assert_eq!(hits[0].metadata.language, "python");
        assert_eq!(hits[0].metadata.repo, "org/repo");
    }

    #[tokio::test]
    async fn test_ingest_reads_files_from_requested_branch() {
        let mut host = FakeHost::default();
        host.add_tree_file("src/app.py", "def run():\n    main branch body");
        host.add_content("dev", "src/app.py", "def run():\n    dev branch body");
        host.add_tree_missing("src/new.py");
        host.add_content("dev", "src/new.py", "def added_on_dev(): pass");

        let store = test_store().await;
        let index = test_index(store.pool().clone());
        let summary = ingest_codebase(&host, &index, "org/repo", "dev").await.unwrap();

        assert_eq!(summary.files_indexed, 2);
        assert!(summary.files_skipped.is_empty());

        let hits = index.semantic_search("run", 1, Some("src/app.py")).await.unwrap();
        assert!(hits[0].text.contains("dev branch body"));
        assert!(!hits[0].text.contains("main branch body"));
    }
}
