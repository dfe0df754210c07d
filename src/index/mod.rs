//! Semantic code index.
//!
//! Source files are split into line-window chunks, embedded through an
//! [`Embedder`](embedding::Embedder) and stored in the `code_chunks` table.
//! Search embeds the query and ranks stored chunks by cosine similarity.

pub mod chunk;
pub mod embedding;
pub mod ingest;
pub mod sqlite;

pub use embedding::OpenAiEmbedder;
pub use ingest::ingest_codebase;
pub use sqlite::SqliteIndex;

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

use crate::github::HostError;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Embedding request failed: {0}")]
    Embedding(String),

    #[error("Embedding HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Index database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Code host error: {0}")]
    Host(#[from] HostError),
}

/// Extensions indexed by codebase ingestion.
pub const SUPPORTED_LANGUAGES: &[(&str, &str)] = &[
    ("py", "python"),
    ("js", "javascript"),
    ("ts", "typescript"),
    ("java", "java"),
    ("go", "go"),
    ("rs", "rust"),
];

/// Language name for a supported file path, by extension.
pub fn language_for_path(path: &str) -> Option<&'static str> {
    let ext = Path::new(path).extension()?.to_str()?;
    SUPPORTED_LANGUAGES
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, lang)| *lang)
}

/// A whole source file to be chunked and indexed.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub repo: String,
    pub file_path: String,
    pub language: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnippetMetadata {
    pub repo: String,
    pub file_path: String,
    pub language: String,
    pub chunk_index: i64,
}

/// One ranked search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Snippet {
    pub text: String,
    pub metadata: SnippetMetadata,
    pub score: f32,
}

/// Semantic search over indexed code.
#[async_trait]
pub trait SemanticIndex: Send + Sync {
    /// Best `top_k` chunks for `query`, optionally restricted to one file path.
    async fn semantic_search(
        &self,
        query: &str,
        top_k: usize,
        file_filter: Option<&str>,
    ) -> Result<Vec<Snippet>, IndexError>;

    /// Chunk, embed and store documents, replacing earlier chunks of the same files.
    /// Returns the number of chunks written.
    async fn index_documents(&self, docs: &[SourceDocument]) -> Result<usize, IndexError>;
}
