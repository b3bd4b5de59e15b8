use crate::error::IndexError;
use crate::index::EmbeddingIndex;
use crate::providers::{with_timeout, EMBEDDING_SERVICE};
use crate::traits::Embedder;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Embeds a question and returns the text of the best matching chunks.
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    timeout: Duration,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, timeout: Duration) -> Self {
        Self { embedder, timeout }
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    pub async fn retrieve(
        &self,
        index: &EmbeddingIndex,
        query: &str,
        k: usize,
    ) -> Result<Vec<String>, IndexError> {
        index.ensure_compatible(self.embedder.as_ref())?;

        let query_vector =
            with_timeout(EMBEDDING_SERVICE, self.timeout, self.embedder.embed_query(query)).await?;
        let hits = index.search(&query_vector, k)?;

        debug!(
            k,
            hits = hits.len(),
            best_score = hits.first().map(|hit| hit.score).unwrap_or_default(),
            "retrieved chunks"
        );
        Ok(hits.into_iter().map(|hit| hit.text).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::test_support::FailingEmbedder;

    async fn listing_index() -> Result<EmbeddingIndex, IndexError> {
        let chunks = vec![
            "A 2-bedroom unit costs 450,000 dollars.".to_string(),
            "Amenities include a rooftop swimming pool.".to_string(),
            "Handover is planned for the fourth quarter.".to_string(),
        ];
        EmbeddingIndex::build(&chunks, &CharacterNgramEmbedder::default(), Duration::from_secs(5))
            .await
    }

    #[tokio::test]
    async fn returns_chunk_texts_best_first() -> Result<(), IndexError> {
        let index = listing_index().await?;
        let retriever = Retriever::new(Arc::new(CharacterNgramEmbedder::default()), Duration::from_secs(5));

        let texts = retriever
            .retrieve(&index, "Amenities include a rooftop swimming pool.", 2)
            .await?;

        assert_eq!(texts.len(), 2);
        assert_eq!(texts[0], "Amenities include a rooftop swimming pool.");
        Ok(())
    }

    #[tokio::test]
    async fn refuses_a_different_embedding_model() -> Result<(), IndexError> {
        let index = listing_index().await?;
        let retriever = Retriever::new(Arc::new(CharacterNgramEmbedder::new(256)), Duration::from_secs(5));

        let result = retriever.retrieve(&index, "pool", 2).await;
        assert!(matches!(result, Err(IndexError::ModelMismatch { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn query_embedding_failures_surface() -> Result<(), IndexError> {
        let index = listing_index().await?;
        let retriever = Retriever::new(Arc::new(FailingEmbedder { status: 503 }), Duration::from_secs(5));

        match retriever.retrieve(&index, "pool", 2).await {
            Err(IndexError::Embedding(error)) => assert!(error.is_retryable()),
            other => panic!("expected embedding error, got {other:?}"),
        }
        Ok(())
    }
}
