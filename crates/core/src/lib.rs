pub mod chunking;
pub mod config;
pub mod credential;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod index;
pub mod ingest;
pub mod models;
pub mod prompt;
pub mod providers;
pub mod registry;
pub mod retriever;
pub mod session;
pub mod store;
pub mod traits;

#[cfg(test)]
mod test_support;

pub use chunking::{chunk_text, ChunkingConfig};
pub use config::{ChatConfig, ProviderConfig, RetrievalConfig, DEFAULT_TOP_K};
pub use credential::CredentialHash;
pub use embeddings::{CharacterNgramEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{ConfigError, IndexError, IngestError, RegistryError, ServiceError, SessionError};
pub use extractor::{extract_page_texts, LopdfExtractor, PageText, PdfExtractor};
pub use index::{EmbeddingIndex, DEFAULT_SEARCH_K, INDEX_FORMAT, INDEX_VERSION};
pub use ingest::{digest_bytes, is_valid_document_id, prepare_chunks, slugify};
pub use models::{ChatMessage, DocumentRecord, DocumentStatus, Role, ScoredChunk};
pub use prompt::compose_messages;
pub use providers::{OpenAiChatModel, OpenAiEmbedder};
pub use registry::{AdminToken, DocumentRegistry, IndexingOptions};
pub use retriever::Retriever;
pub use session::{ConversationSession, SessionOptions, SessionState};
pub use store::{DataLayout, JsonFileRegistryStore, MemoryRegistryStore, RegistrySnapshot};
pub use traits::{Embedder, LanguageModel, RegistryStore};
