use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure of a call to an external collaborator (embedding service or language model).
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{service} is unreachable: {source}")]
    Unreachable {
        service: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} rejected the request with {status}: {details}")]
    Rejected {
        service: String,
        status: u16,
        details: String,
    },

    #[error("invalid response from {service}: {details}")]
    InvalidResponse { service: String, details: String },

    #[error("{service} did not answer within {after:?}")]
    Timeout { service: String, after: Duration },

    #[error("url error: {0}")]
    Url(#[from] url::ParseError),
}

impl ServiceError {
    pub fn from_http(service: &str, error: reqwest::Error, after: Duration) -> Self {
        if error.is_timeout() {
            Self::Timeout {
                service: service.to_string(),
                after,
            }
        } else if error.is_decode() {
            Self::InvalidResponse {
                service: service.to_string(),
                details: error.to_string(),
            }
        } else {
            Self::Unreachable {
                service: service.to_string(),
                source: error,
            }
        }
    }

    /// Whether the same call may succeed when issued again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unreachable { .. } | Self::Timeout { .. } => true,
            Self::Rejected { status, .. } => *status == 429 || *status >= 500,
            Self::InvalidResponse { .. } | Self::Url(_) => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no documents were supplied")]
    NoDocuments,

    #[error("malformed pdf document {name}: {reason}")]
    MalformedDocument { name: String, reason: String },

    #[error("documents contain no extractable text")]
    EmptyCorpus,

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("embedding service error: {0}")]
    EmbeddingService(ServiceError),

    #[error("timed out: {0}")]
    Timeout(ServiceError),

    #[error("embedding dimension {actual} does not match {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<ServiceError> for IngestError {
    fn from(error: ServiceError) -> Self {
        if error.is_timeout() {
            Self::Timeout(error)
        } else {
            Self::EmbeddingService(error)
        }
    }
}

impl IngestError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::EmbeddingService(error) | Self::Timeout(error) => error.is_retryable(),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("question is empty")]
    EmptyQuestion,

    #[error("no index snapshot at {}", .0.display())]
    IndexNotFound(PathBuf),

    #[error("index snapshot at {} is unreadable: {details}", .path.display())]
    CorruptIndex { path: PathBuf, details: String },

    #[error("embedding service error: {0}")]
    EmbeddingService(ServiceError),

    #[error("answer synthesis failed: {0}")]
    Synthesis(ServiceError),

    #[error("timed out: {0}")]
    Timeout(ServiceError),

    #[error("query vector dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SearchError {
    pub(crate) fn embedding(error: ServiceError) -> Self {
        if error.is_timeout() {
            Self::Timeout(error)
        } else {
            Self::EmbeddingService(error)
        }
    }

    pub(crate) fn synthesis(error: ServiceError) -> Self {
        if error.is_timeout() {
            Self::Timeout(error)
        } else {
            Self::Synthesis(error)
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::EmbeddingService(error) | Self::Synthesis(error) | Self::Timeout(error) => {
                error.is_retryable()
            }
            _ => false,
        }
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
