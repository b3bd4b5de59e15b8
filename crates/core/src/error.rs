use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("no extractable text in document {0}; make sure it contains selectable text")]
    EmptyText(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{service} service credential is missing")]
    MissingCredential { service: String },

    #[error("{service} request failed: {source}")]
    Http {
        service: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} service returned {status}: {body}")]
    Status {
        service: String,
        status: u16,
        body: String,
    },

    #[error("invalid response from {service}: {details}")]
    InvalidResponse { service: String, details: String },

    #[error("{service} request timed out after {after:?}")]
    Timeout { service: String, after: Duration },
}

impl ServiceError {
    /// Whether a caller may reasonably retry the same request with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Timeout { .. } => true,
            ServiceError::Http { source, .. } => {
                source.is_timeout() || source.is_connect() || source.is_request()
            }
            ServiceError::Status { status, .. } => *status == 429 || *status >= 500,
            ServiceError::MissingCredential { .. } | ServiceError::InvalidResponse { .. } => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("embedding service error: {0}")]
    Embedding(#[from] ServiceError),

    #[error("index was built with embedding model {expected}, but {actual} was supplied")]
    ModelMismatch { expected: String, actual: String },

    #[error("vector dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding count {embeddings} doesn't match chunk count {chunks}")]
    CountMismatch { chunks: usize, embeddings: usize },

    #[error("unsupported index format: {0}")]
    UnsupportedFormat(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("document {0} already exists")]
    DuplicateId(String),

    #[error("document {0} not found")]
    NotFound(String),

    #[error("document {0} has not been processed yet")]
    NotProcessed(String),

    #[error("invalid document id {0:?}: use lowercase letters, digits, '_' or '-'")]
    InvalidId(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("document {0} is being modified by another operation")]
    Busy(String),

    #[error("admin credential rejected")]
    Unauthorized,

    #[error("extraction failed: {0}")]
    Extraction(#[from] IngestError),

    #[error("indexing failed: {0}")]
    Index(#[from] IndexError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RegistryError {
    pub fn is_retryable(&self) -> bool {
        match self {
            RegistryError::Busy(_) => true,
            RegistryError::Index(IndexError::Embedding(source)) => source.is_retryable(),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no document is bound to this conversation")]
    Uninitialized,

    #[error("question is empty")]
    EmptyQuestion,

    #[error("another question is still being answered in this conversation")]
    Busy,

    #[error("retrieval failed: {0}")]
    Retrieval(#[source] IndexError),

    #[error("answer generation failed: {0}")]
    AnswerGeneration(#[source] ServiceError),
}

impl SessionError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SessionError::Busy => true,
            SessionError::Retrieval(IndexError::Embedding(source))
            | SessionError::AnswerGeneration(source) => source.is_retryable(),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
