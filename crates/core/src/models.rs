use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::IngestError;

pub const DEFAULT_FALLBACK_ANSWER: &str = "I don't have more context about that.";
pub const NO_INDEX_MESSAGE: &str =
    "No document has been indexed yet. Upload and process PDF files first.";
pub const NO_RELEVANT_DOCUMENTS_MESSAGE: &str = "No relevant documents found for the question.";

/// One uploaded PDF. Only its bytes and a display name are needed.
#[derive(Debug, Clone)]
pub struct Document {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl Document {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn from_reader(name: impl Into<String>, mut reader: impl Read) -> Result<Self, IngestError> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Ok(Self::new(name, bytes))
    }

    pub fn from_path(path: &Path) -> Result<Self, IngestError> {
        let bytes = std::fs::read(path)?;
        Ok(Self::new(path.to_string_lossy(), bytes))
    }
}

/// Text of every document in one build, concatenated in upload order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorpusText {
    pub text: String,
    pub pages_total: usize,
    pub pages_skipped: usize,
}

impl CorpusText {
    pub fn has_content(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextChunk {
    pub chunk_id: String,
    pub index: u64,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorEntry {
    pub chunk: TextChunk,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: TextChunk,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub context: Vec<TextChunk>,
}

/// Outcome of a question.
#[derive(Debug, Clone)]
pub enum Reply {
    Answered(Answer),
    NoIndex,
    NoRelevantDocuments,
}

impl Reply {
    pub fn message(&self) -> &str {
        match self {
            Reply::Answered(answer) => &answer.text,
            Reply::NoIndex => NO_INDEX_MESSAGE,
            Reply::NoRelevantDocuments => NO_RELEVANT_DOCUMENTS_MESSAGE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuildReport {
    pub documents: usize,
    pub pages_total: usize,
    pub pages_skipped: usize,
    pub chunks: usize,
    pub dimensions: usize,
    pub snapshot: PathBuf,
    pub built_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RagConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub request_timeout: Duration,
    pub embedding_concurrency: usize,
    pub index_dir: PathBuf,
    pub fallback_answer: String,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 10_000,
            chunk_overlap: 1_000,
            top_k: 4,
            request_timeout: Duration::from_secs(30),
            embedding_concurrency: 4,
            index_dir: PathBuf::from("faiss_index"),
            fallback_answer: DEFAULT_FALLBACK_ANSWER.to_string(),
        }
    }
}
