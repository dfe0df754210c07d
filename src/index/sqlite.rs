use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use tracing::{debug, instrument};

use super::chunk::{chunk_code, ChunkOptions};
use super::embedding::{blob_to_vec, cosine_similarity, vec_to_blob, Embedder};
use super::{IndexError, SemanticIndex, Snippet, SnippetMetadata, SourceDocument};

/// Vector index stored in the `code_chunks` table, ranked by brute-force cosine similarity.
pub struct SqliteIndex {
    pool: SqlitePool,
    embedder: Arc<dyn Embedder>,
    chunking: ChunkOptions,
    batch_size: usize,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool, embedder: Arc<dyn Embedder>, chunking: ChunkOptions, batch_size: usize) -> Self {
        Self {
            pool,
            embedder,
            chunking,
            batch_size: batch_size.max(1),
        }
    }

    async fn embed_batched(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
        debug!(model = self.embedder.model_name(), texts = texts.len(), "embedding texts");
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            vectors.extend(self.embedder.embed(batch).await?);
        }
        if vectors.len() != texts.len() {
            return Err(IndexError::Embedding(format!(
                "embedder returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }
        Ok(vectors)
    }
}

#[async_trait]
impl SemanticIndex for SqliteIndex {
    #[instrument(skip(self, query))]
    async fn semantic_search(
        &self,
        query: &str,
        top_k: usize,
        file_filter: Option<&str>,
    ) -> Result<Vec<Snippet>, IndexError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let query_vec = self
            .embed_batched(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| IndexError::Embedding("empty embedding response".to_string()))?;

        let rows = match file_filter {
            Some(path) => {
                sqlx::query(
                    "SELECT repo, file_path, language, chunk_index, text, embedding FROM code_chunks WHERE file_path = ?",
                )
                .bind(path)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT repo, file_path, language, chunk_index, text, embedding FROM code_chunks")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.try_get("embedding")?;
            hits.push(Snippet {
                score: cosine_similarity(&query_vec, &blob_to_vec(&blob)),
                text: row.try_get("text")?,
                metadata: SnippetMetadata {
                    repo: row.try_get("repo")?,
                    file_path: row.try_get("file_path")?,
                    language: row.try_get("language")?,
                    chunk_index: row.try_get("chunk_index")?,
                },
            });
        }

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        debug!(candidates = rows.len(), returned = hits.len(), "semantic search");
        Ok(hits)
    }

    async fn index_documents(&self, docs: &[SourceDocument]) -> Result<usize, IndexError> {
        let mut written = 0;
        for doc in docs {
            let chunks = chunk_code(&doc.text, self.chunking);
            let vectors = self.embed_batched(&chunks).await?;

            let mut tx = self.pool.begin().await?;
            sqlx::query("DELETE FROM code_chunks WHERE repo = ? AND file_path = ?")
                .bind(&doc.repo)
                .bind(&doc.file_path)
                .execute(&mut *tx)
                .await?;

            for (i, (text, vector)) in chunks.iter().zip(&vectors).enumerate() {
                sqlx::query(
                    r#"
                    INSERT INTO code_chunks (id, repo, file_path, language, chunk_index, text, embedding)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(format!("{}:{}:{}", doc.repo, doc.file_path, i))
                .bind(&doc.repo)
                .bind(&doc.file_path)
                .bind(&doc.language)
                .bind(i as i64)
                .bind(text)
                .bind(vec_to_blob(vector))
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;

            debug!(file = %doc.file_path, chunks = chunks.len(), "indexed document");
            written += chunks.len();
        }
        Ok(written)
    }
}

#[cfg(test)]
pub(crate) fn test_index(pool: SqlitePool) -> SqliteIndex {
    SqliteIndex::new(
        pool,
        Arc::new(super::embedding::testing::HashEmbedder),
        ChunkOptions::default(),
        8,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sqlite::test_store;

    fn doc(path: &str, text: &str) -> SourceDocument {
        SourceDocument {
            repo: "org/repo".to_string(),
            file_path: path.to_string(),
            language: "python".to_string(),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_index_and_search_ranks_relevant_file_first() {
        let store = test_store().await;
        let index = test_index(store.pool().clone());

        let written = index
            .index_documents(&[
                doc("auth/login.py", "def login(user, password):\n    check password for user"),
                doc("render/table.py", "def render_table(rows):\n    draw markdown table rows"),
            ])
            .await
            .unwrap();
        assert_eq!(written, 2);

        let hits = index.semantic_search("login password user", 1, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.file_path, "auth/login.py");
        assert_eq!(hits[0].metadata.chunk_index, 0);
    }

    #[tokio::test]
    async fn test_file_filter() {
        let store = test_store().await;
        let index = test_index(store.pool().clone());
        index
            .index_documents(&[doc("a.py", "alpha beta"), doc("b.py", "alpha gamma")])
            .await
            .unwrap();

        let hits = index.semantic_search("alpha", 5, Some("b.py")).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.file_path, "b.py");
    }

    #[tokio::test]
    async fn test_reindex_replaces_chunks() {
        let store = test_store().await;
        let index = test_index(store.pool().clone());
        let long: String = (0..130).map(|i| format!("line {}\n", i)).collect();
        assert!(index.index_documents(&[doc("a.py", &long)]).await.unwrap() > 1);
        assert_eq!(index.index_documents(&[doc("a.py", "short")]).await.unwrap(), 1);

        let hits = index.semantic_search("short", 10, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "short");
    }

    #[tokio::test]
    async fn test_empty_index_returns_nothing() {
        let store = test_store().await;
        let index = test_index(store.pool().clone());
        assert!(index.semantic_search("anything", 3, None).await.unwrap().is_empty());
        assert!(index.semantic_search("anything", 0, None).await.unwrap().is_empty());
    }
}
