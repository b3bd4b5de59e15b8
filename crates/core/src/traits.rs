use crate::store::RegistrySnapshot;
use crate::{ChatMessage, RegistryError, ServiceError};
use async_trait::async_trait;

/// Text embedding service used both to build an index and to embed queries.
///
/// `model_id` is recorded in every index and checked again at query time, so two
/// embedders must only share an id when their vectors are interchangeable.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_id(&self) -> &str;

    fn dimensions(&self) -> usize;

    /// Largest number of inputs accepted by one `embed` call.
    fn batch_size(&self) -> usize {
        64
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ServiceError>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| ServiceError::InvalidResponse {
            service: "embedding".to_string(),
            details: "no vector returned for query".to_string(),
        })
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ServiceError>;
}

/// Durable home of the registry snapshot. Implementations replace the whole
/// snapshot on `save`; there is no partial update.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    async fn load(&self) -> Result<Option<RegistrySnapshot>, RegistryError>;

    async fn save(&self, snapshot: &RegistrySnapshot) -> Result<(), RegistryError>;
}
