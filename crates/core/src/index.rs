use crate::error::{IngestError, SearchError};
use crate::models::{ScoredChunk, TextChunk, VectorEntry};
use crate::traits::{bounded, Embedder};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

pub const SNAPSHOT_FILE: &str = "index.json";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy)]
pub struct IndexOptions {
    pub concurrency: usize,
    pub timeout: Duration,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            timeout: Duration::from_secs(30),
        }
    }
}

/// In-memory set of embedded chunks, also the on-disk snapshot format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorIndex {
    pub format_version: u32,
    pub embedding_model: String,
    pub dimensions: usize,
    pub created_at: DateTime<Utc>,
    pub entries: Vec<VectorEntry>,
}

impl VectorIndex {
    pub fn empty(embedding_model: impl Into<String>) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            embedding_model: embedding_model.into(),
            dimensions: 0,
            created_at: Utc::now(),
            entries: Vec::new(),
        }
    }

    /// Embeds every chunk and pairs it with its vector.
    ///
    /// Up to `options.concurrency` calls are in flight at once. The first failed
    /// or timed out call aborts the build; no partial index is returned.
    pub async fn build<E>(
        chunks: Vec<TextChunk>,
        embedder: &E,
        options: IndexOptions,
    ) -> Result<Self, IngestError>
    where
        E: Embedder + Sync + ?Sized,
    {
        let model = embedder.model_name().to_string();
        let vectors: Vec<Vec<f32>> = stream::iter(chunks.iter())
            .map(|chunk| bounded(&model, options.timeout, embedder.embed(&chunk.text)))
            .buffered(options.concurrency.max(1))
            .try_collect()
            .await?;

        let dimensions = vectors.first().map(Vec::len).unwrap_or(0);
        if let Some(mismatch) = vectors.iter().find(|vector| vector.len() != dimensions) {
            return Err(IngestError::DimensionMismatch {
                expected: dimensions,
                actual: mismatch.len(),
            });
        }

        let entries = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectorEntry { chunk, vector })
            .collect::<Vec<_>>();

        debug!(entries = entries.len(), dimensions, model = %model, "embedded chunks");

        Ok(Self {
            format_version: FORMAT_VERSION,
            embedding_model: model,
            dimensions,
            created_at: Utc::now(),
            entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot_path(location: &Path) -> PathBuf {
        location.join(SNAPSHOT_FILE)
    }

    /// Writes the snapshot into `location`, atomically replacing any previous one.
    pub fn persist(&self, location: &Path) -> Result<PathBuf, IngestError> {
        std::fs::create_dir_all(location)?;
        let target = Self::snapshot_path(location);

        let staging = NamedTempFile::new_in(location)?;
        {
            let mut writer = BufWriter::new(staging.as_file());
            serde_json::to_writer(&mut writer, self)?;
            writer.flush()?;
        }
        staging.as_file().sync_all()?;
        staging.persist(&target).map_err(|error| error.error)?;

        info!(path = %target.display(), entries = self.entries.len(), "index snapshot written");
        Ok(target)
    }

    pub fn load(location: &Path) -> Result<Self, SearchError> {
        let path = Self::snapshot_path(location);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                return Err(SearchError::IndexNotFound(location.to_path_buf()))
            }
            Err(error) => return Err(SearchError::Io(error)),
        };

        let index: Self =
            serde_json::from_slice(&bytes).map_err(|error| SearchError::CorruptIndex {
                path: path.clone(),
                details: error.to_string(),
            })?;

        if index.format_version != FORMAT_VERSION {
            return Err(SearchError::CorruptIndex {
                path,
                details: format!("unsupported snapshot format {}", index.format_version),
            });
        }

        Ok(index)
    }

    /// Returns the `k` entries most similar to `query` by cosine similarity.
    ///
    /// An index without entries yields an empty result without calling the embedder.
    pub async fn search<E>(
        &self,
        query: &str,
        k: usize,
        embedder: &E,
        timeout: Duration,
    ) -> Result<Vec<ScoredChunk>, SearchError>
    where
        E: Embedder + Sync + ?Sized,
    {
        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        if embedder.model_name() != self.embedding_model {
            warn!(
                index_model = %self.embedding_model,
                query_model = %embedder.model_name(),
                "query embedder differs from the model the index was built with"
            );
        }

        let query_vector = bounded(embedder.model_name(), timeout, embedder.embed(query))
            .await
            .map_err(SearchError::embedding)?;

        self.rank(&query_vector, k)
    }

    /// Ranks entries against an already embedded query. Equal scores keep emission order.
    pub fn rank(&self, query_vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, SearchError> {
        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query_vector.len() != self.dimensions {
            return Err(SearchError::DimensionMismatch {
                expected: self.dimensions,
                actual: query_vector.len(),
            });
        }

        let mut scored = self
            .entries
            .iter()
            .map(|entry| ScoredChunk {
                chunk: entry.chunk.clone(),
                score: cosine_similarity(query_vector, &entry.vector),
            })
            .collect::<Vec<_>>();

        scored.sort_by(|left, right| right.score.total_cmp(&left.score));
        scored.truncate(k);
        Ok(scored)
    }
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    let dot = left.iter().zip(right).map(|(a, b)| a * b).sum::<f32>();
    let left_norm = left.iter().map(|value| value * value).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|value| value * value).sum::<f32>().sqrt();

    if left_norm == 0.0 || right_norm == 0.0 {
        0.0
    } else {
        dot / (left_norm * right_norm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::{build_chunks, ChunkingConfig};
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::error::ServiceError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn chunks(texts: &[&str]) -> Vec<TextChunk> {
        texts
            .iter()
            .enumerate()
            .map(|(index, text)| TextChunk {
                chunk_id: format!("chunk-{index}"),
                index: index as u64,
                text: text.to_string(),
            })
            .collect()
    }

    /// Counts calls and fails every one of them.
    #[derive(Default)]
    struct UnreachableEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for UnreachableEmbedder {
        fn model_name(&self) -> &str {
            "unreachable"
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ServiceError::Rejected {
                service: "unreachable".to_string(),
                status: 503,
                details: "down".to_string(),
            })
        }
    }

    /// Encodes the text length and finishes short texts last, so completion order
    /// differs from submission order.
    struct DelayedLengthEmbedder;

    #[async_trait]
    impl Embedder for DelayedLengthEmbedder {
        fn model_name(&self) -> &str {
            "delayed-length"
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
            let delay = 60u64.saturating_sub(text.len() as u64 * 10);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(vec![text.len() as f32, 1.0])
        }
    }

    struct HangingEmbedder;

    #[async_trait]
    impl Embedder for HangingEmbedder {
        fn model_name(&self) -> &str {
            "hanging"
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ServiceError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(vec![1.0])
        }
    }

    async fn sample_index() -> VectorIndex {
        let chunks = build_chunks(
            "Hydraulic pumps move oil.\n\nThe capital of France is Paris.\n\nGaskets seal flanges.",
            ChunkingConfig {
                chunk_size: 34,
                chunk_overlap: 0,
            },
        )
        .expect("chunking");
        VectorIndex::build(chunks, &CharacterNgramEmbedder::default(), IndexOptions::default())
            .await
            .expect("build")
    }

    #[tokio::test]
    async fn build_pairs_vectors_with_their_chunks_despite_completion_order() {
        let texts = ["a", "bbb", "bbbbb", "bb"];
        let options = IndexOptions {
            concurrency: 4,
            timeout: TIMEOUT,
        };

        let index = VectorIndex::build(chunks(&texts), &DelayedLengthEmbedder, options)
            .await
            .expect("build");

        assert_eq!(index.dimensions, 2);
        for entry in &index.entries {
            assert_eq!(entry.vector[0], entry.chunk.text.len() as f32);
        }
    }

    #[tokio::test]
    async fn build_fails_fast_when_service_rejects() {
        let embedder = UnreachableEmbedder::default();
        let options = IndexOptions {
            concurrency: 1,
            timeout: TIMEOUT,
        };

        let result = VectorIndex::build(chunks(&["one", "two", "three"]), &embedder, options).await;

        assert!(matches!(result, Err(IngestError::EmbeddingService(_))));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn build_reports_timeouts_distinctly() {
        let options = IndexOptions {
            concurrency: 2,
            timeout: Duration::from_millis(50),
        };

        let result = VectorIndex::build(chunks(&["one"]), &HangingEmbedder, options).await;

        match result {
            Err(error @ IngestError::Timeout(_)) => assert!(error.is_retryable()),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_index_search_never_errors_or_embeds() {
        let index = VectorIndex::empty("unreachable");
        let embedder = UnreachableEmbedder::default();

        for k in 0..3 {
            let hits = index
                .search("anything at all", k, &embedder, TIMEOUT)
                .await
                .expect("empty search must succeed");
            assert!(hits.is_empty());
        }
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn k_larger_than_entry_count_returns_everything_ranked() {
        let index = sample_index().await;
        let embedder = CharacterNgramEmbedder::default();

        let hits = index
            .search("What is the capital of France?", 50, &embedder, TIMEOUT)
            .await
            .expect("search");

        assert_eq!(hits.len(), index.len());
        assert!(hits[0].chunk.text.contains("Paris"));
        assert!(hits.windows(2).all(|pair| pair[0].score >= pair[1].score));
    }

    #[test]
    fn equal_scores_keep_emission_order() -> Result<(), SearchError> {
        let mut index = VectorIndex::empty("manual");
        index.dimensions = 2;
        index.entries = chunks(&["first", "second", "third"])
            .into_iter()
            .zip([vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 0.0]])
            .map(|(chunk, vector)| VectorEntry { chunk, vector })
            .collect();

        let hits = index.rank(&[1.0, 0.0], 3)?;

        let order: Vec<u64> = hits.iter().map(|hit| hit.chunk.index).collect();
        assert_eq!(order, vec![0, 2, 1]);
        Ok(())
    }

    #[test]
    fn query_with_other_dimensions_is_rejected() {
        let mut index = VectorIndex::empty("manual");
        index.dimensions = 2;
        index.entries = vec![VectorEntry {
            chunk: chunks(&["only"]).remove(0),
            vector: vec![1.0, 0.0],
        }];

        assert!(matches!(
            index.rank(&[1.0, 0.0, 0.0], 1),
            Err(SearchError::DimensionMismatch { expected: 2, actual: 3 })
        ));
    }

    #[tokio::test]
    async fn persisted_index_searches_like_the_original() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let location = dir.path().join("faiss_index");
        let index = sample_index().await;
        let embedder = CharacterNgramEmbedder::default();

        index.persist(&location)?;
        let loaded = VectorIndex::load(&location)?;

        assert_eq!(loaded, index);
        for (query, k) in [("capital of France", 1), ("oil pumps", 2), ("flange gasket", 5)] {
            let expected = index.search(query, k, &embedder, TIMEOUT).await?;
            let actual = loaded.search(query, k, &embedder, TIMEOUT).await?;
            assert_eq!(actual, expected);
        }
        Ok(())
    }

    #[tokio::test]
    async fn second_persist_replaces_the_first_snapshot() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let embedder = CharacterNgramEmbedder::default();
        let options = IndexOptions::default();

        let first = VectorIndex::build(chunks(&["old one", "old two", "old three"]), &embedder, options).await?;
        let second = VectorIndex::build(chunks(&["new only"]), &embedder, options).await?;
        first.persist(dir.path())?;
        second.persist(dir.path())?;

        let loaded = VectorIndex::load(dir.path())?;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.entries[0].chunk.text, "new only");

        let leftovers = std::fs::read_dir(dir.path())?.count();
        assert_eq!(leftovers, 1, "staging files must not remain");
        Ok(())
    }

    #[test]
    fn missing_snapshot_is_index_not_found() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let result = VectorIndex::load(&dir.path().join("never-built"));
        assert!(matches!(result, Err(SearchError::IndexNotFound(_))));
        Ok(())
    }

    #[test]
    fn garbage_snapshot_is_corrupt_not_missing() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join(SNAPSHOT_FILE), b"{ not json")?;
        let result = VectorIndex::load(dir.path());
        assert!(matches!(result, Err(SearchError::CorruptIndex { .. })));
        Ok(())
    }

    #[test]
    fn cosine_handles_zero_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[2.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
    }
}
