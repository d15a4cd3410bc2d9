pub mod answer;
pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod index;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod providers;
pub mod traits;

pub use answer::{build_prompt, synthesize, SynthesisOptions};
pub use chunking::{build_chunks, split_text, ChunkingConfig};
pub use embeddings::{CharacterNgramEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{IngestError, SearchError, ServiceError};
pub use extractor::{extract_corpus, LopdfExtractor, PageText, PdfExtractor};
pub use index::{cosine_similarity, IndexOptions, VectorIndex};
pub use ingest::{collect_documents, discover_pdf_files};
pub use models::{
    Answer, BuildReport, CorpusText, Document, RagConfig, Reply, ScoredChunk, TextChunk,
    VectorEntry, DEFAULT_FALLBACK_ANSWER, NO_INDEX_MESSAGE, NO_RELEVANT_DOCUMENTS_MESSAGE,
};
pub use orchestrator::{BuildStage, PdfChat, QueryStage};
pub use providers::{GeminiChatModel, GeminiConfig, GeminiEmbedder};
pub use traits::{Embedder, LanguageModel};
