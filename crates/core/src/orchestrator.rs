use crate::answer::{synthesize, SynthesisOptions};
use crate::chunking::{build_chunks, ChunkingConfig};
use crate::extractor::{extract_corpus, LopdfExtractor, PdfExtractor};
use crate::index::{IndexOptions, VectorIndex};
use crate::models::{BuildReport, Document, RagConfig, Reply};
use crate::traits::{Embedder, LanguageModel};
use crate::{IngestError, SearchError};
use chrono::Utc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    Idle,
    Extracting,
    Chunking,
    Embedding,
    Persisting,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStage {
    Idle,
    LoadingIndex,
    Searching,
    EmptyResult,
    Synthesizing,
    Responded,
}

/// Runs the index build and question flows against one snapshot location.
pub struct PdfChat<E, L, X = LopdfExtractor> {
    config: RagConfig,
    embedder: E,
    model: L,
    extractor: X,
}

impl<E, L> PdfChat<E, L>
where
    E: Embedder + Send + Sync,
    L: LanguageModel + Send + Sync,
{
    pub fn new(config: RagConfig, embedder: E, model: L) -> Self {
        Self::with_extractor(config, embedder, model, LopdfExtractor)
    }
}

impl<E, L, X> PdfChat<E, L, X>
where
    E: Embedder + Send + Sync,
    L: LanguageModel + Send + Sync,
    X: PdfExtractor,
{
    pub fn with_extractor(config: RagConfig, embedder: E, model: L, extractor: X) -> Self {
        Self {
            config,
            embedder,
            model,
            extractor,
        }
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Extracts, chunks, embeds and persists `documents`, replacing the previous index.
    ///
    /// Nothing is written unless every stage before persisting succeeds.
    pub async fn build_index(&self, documents: &[Document]) -> Result<BuildReport, IngestError> {
        let mut stage = BuildStage::Idle;
        let result = self.run_build(documents, &mut stage).await;
        if let Err(error) = &result {
            warn!(stage = ?stage, %error, "index build failed");
        }
        result
    }

    async fn run_build(
        &self,
        documents: &[Document],
        stage: &mut BuildStage,
    ) -> Result<BuildReport, IngestError> {
        if documents.is_empty() {
            return Err(IngestError::NoDocuments);
        }
        let chunking = ChunkingConfig::from(&self.config);
        chunking.validate()?;

        advance(stage, BuildStage::Extracting);
        let corpus = extract_corpus(&self.extractor, documents)?;
        if !corpus.has_content() {
            return Err(IngestError::EmptyCorpus);
        }

        advance(stage, BuildStage::Chunking);
        let chunks = build_chunks(&corpus.text, chunking)?;
        let chunk_count = chunks.len();
        info!(chunks = chunk_count, corpus_chars = corpus.text.chars().count(), "split corpus");

        advance(stage, BuildStage::Embedding);
        let options = IndexOptions {
            concurrency: self.config.embedding_concurrency,
            timeout: self.config.request_timeout,
        };
        let index = VectorIndex::build(chunks, &self.embedder, options).await?;

        advance(stage, BuildStage::Persisting);
        let snapshot = index.persist(&self.config.index_dir)?;

        advance(stage, BuildStage::Done);
        Ok(BuildReport {
            documents: documents.len(),
            pages_total: corpus.pages_total,
            pages_skipped: corpus.pages_skipped,
            chunks: chunk_count,
            dimensions: index.dimensions,
            snapshot,
            built_at: Utc::now(),
        })
    }

    /// Answers `question` from the persisted index.
    ///
    /// A missing index and an empty search result are replies, not errors.
    pub async fn ask(&self, question: &str) -> Result<Reply, SearchError> {
        let mut stage = QueryStage::Idle;
        let result = self.run_query(question, &mut stage).await;
        if let Err(error) = &result {
            warn!(stage = ?stage, %error, "query failed");
        }
        result
    }

    async fn run_query(&self, question: &str, stage: &mut QueryStage) -> Result<Reply, SearchError> {
        if question.trim().is_empty() {
            return Err(SearchError::EmptyQuestion);
        }

        advance(stage, QueryStage::LoadingIndex);
        let index = match VectorIndex::load(&self.config.index_dir) {
            Ok(index) => index,
            Err(SearchError::IndexNotFound(path)) => {
                info!(path = %path.display(), "no index built yet");
                advance(stage, QueryStage::Responded);
                return Ok(Reply::NoIndex);
            }
            Err(error) => return Err(error),
        };

        advance(stage, QueryStage::Searching);
        let hits = index
            .search(
                question,
                self.config.top_k,
                &self.embedder,
                self.config.request_timeout,
            )
            .await?;

        if hits.is_empty() {
            advance(stage, QueryStage::EmptyResult);
            advance(stage, QueryStage::Responded);
            return Ok(Reply::NoRelevantDocuments);
        }

        for hit in &hits {
            debug!(chunk = hit.chunk.index, score = hit.score, "retrieved chunk");
        }

        advance(stage, QueryStage::Synthesizing);
        let options = SynthesisOptions {
            fallback_answer: self.config.fallback_answer.clone(),
            timeout: self.config.request_timeout,
        };
        let context = hits.into_iter().map(|hit| hit.chunk).collect();
        let answer = synthesize(question, context, &self.model, &options).await?;

        advance(stage, QueryStage::Responded);
        Ok(Reply::Answered(answer))
    }
}

fn advance<S: std::fmt::Debug + Copy>(current: &mut S, next: S) {
    debug!(from = ?*current, to = ?next, "stage");
    *current = next;
}
