//! Per-document conversation.
//!
//! A session is `Uninitialized` until a document index is bound, `Ready`
//! between turns and `Answering` while one `ask` is in flight. At most one turn
//! runs at a time: a second concurrent `ask` is rejected with
//! [`SessionError::Busy`] instead of being queued.

use crate::config::ChatConfig;
use crate::error::SessionError;
use crate::index::EmbeddingIndex;
use crate::models::ChatMessage;
use crate::prompt::compose_messages;
use crate::providers::{with_timeout, CHAT_SERVICE};
use crate::retriever::Retriever;
use crate::traits::{Embedder, LanguageModel};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Ready,
    Answering,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub top_k: usize,
    pub timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            top_k: crate::config::DEFAULT_TOP_K,
            timeout: Duration::from_secs(60),
        }
    }
}

impl From<&ChatConfig> for SessionOptions {
    fn from(config: &ChatConfig) -> Self {
        Self {
            top_k: config.retrieval.top_k,
            timeout: config.provider.request_timeout(),
        }
    }
}

struct Binding {
    document_id: String,
    index: Arc<EmbeddingIndex>,
}

#[derive(Default)]
struct Conversation {
    binding: Option<Binding>,
    history: Vec<ChatMessage>,
}

pub struct ConversationSession {
    retriever: Retriever,
    model: Arc<dyn LanguageModel>,
    options: SessionOptions,
    conversation: Mutex<Conversation>,
}

impl ConversationSession {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn LanguageModel>,
        options: SessionOptions,
    ) -> Self {
        Self {
            retriever: Retriever::new(embedder, options.timeout),
            model,
            options,
            conversation: Mutex::new(Conversation::default()),
        }
    }

    /// Binds the session to a document, discarding any previous history.
    pub fn bind(
        &self,
        document_id: impl Into<String>,
        index: EmbeddingIndex,
    ) -> Result<(), SessionError> {
        index
            .ensure_compatible(self.retriever.embedder())
            .map_err(SessionError::Retrieval)?;

        let mut conversation = self.conversation.try_lock().map_err(|_| SessionError::Busy)?;
        let document_id = document_id.into();
        info!(document_id = %document_id, chunk_count = index.len(), "conversation bound");

        *conversation = Conversation {
            binding: Some(Binding {
                document_id,
                index: Arc::new(index),
            }),
            history: Vec::new(),
        };
        Ok(())
    }

    /// Starts a new chat on the same document.
    pub fn reset(&self) -> Result<(), SessionError> {
        let mut conversation = self.conversation.try_lock().map_err(|_| SessionError::Busy)?;
        conversation.history.clear();
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        match self.conversation.try_lock() {
            Err(_) => SessionState::Answering,
            Ok(conversation) if conversation.binding.is_some() => SessionState::Ready,
            Ok(_) => SessionState::Uninitialized,
        }
    }

    pub async fn document_id(&self) -> Option<String> {
        let conversation = self.conversation.lock().await;
        conversation
            .binding
            .as_ref()
            .map(|binding| binding.document_id.clone())
    }

    pub async fn history(&self) -> Vec<ChatMessage> {
        self.conversation.lock().await.history.clone()
    }

    /// Answers one question. The question is recorded before retrieval starts,
    /// so a failed turn stays visible as a user message without an answer.
    pub async fn ask(&self, question: &str) -> Result<String, SessionError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(SessionError::EmptyQuestion);
        }

        let mut conversation = self.conversation.try_lock().map_err(|_| SessionError::Busy)?;
        let (document_id, index) = match &conversation.binding {
            Some(binding) => (binding.document_id.clone(), Arc::clone(&binding.index)),
            None => return Err(SessionError::Uninitialized),
        };

        let started = Instant::now();
        let prior = conversation.history.clone();
        conversation.history.push(ChatMessage::user(question));

        let context = self
            .retriever
            .retrieve(&index, question, self.options.top_k)
            .await
            .map_err(|error| {
                warn!(document_id = %document_id, %error, "retrieval failed");
                SessionError::Retrieval(error)
            })?;

        let messages = compose_messages(&document_id, &context, &prior, question);
        let answer = with_timeout(CHAT_SERVICE, self.options.timeout, self.model.complete(&messages))
            .await
            .map_err(|error| {
                warn!(document_id = %document_id, %error, "answer generation failed");
                SessionError::AnswerGeneration(error)
            })?;

        conversation.history.push(ChatMessage::assistant(answer.clone()));
        info!(
            document_id = %document_id,
            context_chunks = context.len(),
            turns = conversation.history.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "question answered"
        );
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::error::{IndexError, ServiceError};
    use crate::models::Role;
    use crate::test_support::{FailingEmbedder, FailingModel, RecordingModel};

    async fn brochure_index() -> Result<EmbeddingIndex, IndexError> {
        let chunks = vec![
            "Tower A prices: a 2-bedroom unit costs 450,000 dollars.".to_string(),
            "Amenities include a rooftop swimming pool and a gym.".to_string(),
            "Handover is planned for the fourth quarter.".to_string(),
        ];
        EmbeddingIndex::build(&chunks, &CharacterNgramEmbedder::default(), Duration::from_secs(5))
            .await
    }

    fn session_with(model: Arc<dyn LanguageModel>) -> ConversationSession {
        ConversationSession::new(
            Arc::new(CharacterNgramEmbedder::default()),
            model,
            SessionOptions::default(),
        )
    }

    #[tokio::test]
    async fn follow_up_prompt_carries_previous_turn() -> Result<(), Box<dyn std::error::Error>> {
        let model = Arc::new(RecordingModel::default());
        let session = session_with(model.clone());
        session.bind("brochure", brochure_index().await?)?;
        assert_eq!(session.state(), SessionState::Ready);

        let first = session.ask("What is the price of a 2-bedroom unit?").await?;
        assert!(!first.is_empty());
        let second = session.ask("What about the amenities?").await?;
        assert!(!second.is_empty());

        let prompts = model.recorded();
        assert_eq!(prompts.len(), 2);

        let first_prompt = &prompts[0];
        assert!(first_prompt[0].content.contains("450,000"));

        let follow_up = &prompts[1];
        assert_eq!(follow_up[0].role, Role::System);
        assert!(follow_up[0].content.contains("swimming pool"));
        assert_eq!(follow_up[1], ChatMessage::user("What is the price of a 2-bedroom unit?"));
        assert_eq!(follow_up[2], ChatMessage::assistant(first.clone()));
        assert_eq!(follow_up[3], ChatMessage::user("What about the amenities?"));

        let history = session.history().await;
        assert_eq!(history.len(), 4);
        assert_eq!(history[3], ChatMessage::assistant(second));
        Ok(())
    }

    #[tokio::test]
    async fn failed_answer_keeps_only_the_question() -> Result<(), Box<dyn std::error::Error>> {
        let session = session_with(Arc::new(FailingModel));
        session.bind("brochure", brochure_index().await?)?;

        let result = session.ask("What is the price?").await;
        match result {
            Err(SessionError::AnswerGeneration(ServiceError::Status { status, .. })) => {
                assert_eq!(status, 401)
            }
            other => panic!("expected answer generation error, got {other:?}"),
        }

        assert_eq!(session.history().await, vec![ChatMessage::user("What is the price?")]);
        assert_eq!(session.state(), SessionState::Ready);
        Ok(())
    }

    #[tokio::test]
    async fn slow_answer_times_out_without_committing() -> Result<(), Box<dyn std::error::Error>> {
        let session = ConversationSession::new(
            Arc::new(CharacterNgramEmbedder::default()),
            Arc::new(RecordingModel::with_delay(Duration::from_secs(5))),
            SessionOptions {
                timeout: Duration::from_millis(50),
                ..SessionOptions::default()
            },
        );
        session.bind("brochure", brochure_index().await?)?;

        let error = match session.ask("pool?").await {
            Err(error) => error,
            Ok(answer) => panic!("unexpected answer {answer}"),
        };
        assert!(matches!(
            error,
            SessionError::AnswerGeneration(ServiceError::Timeout { .. })
        ));
        assert!(error.is_retryable());
        assert_eq!(session.history().await, vec![ChatMessage::user("pool?")]);
        assert_eq!(session.state(), SessionState::Ready);
        Ok(())
    }

    #[tokio::test]
    async fn retrieval_failure_is_reported() -> Result<(), Box<dyn std::error::Error>> {
        let session = ConversationSession::new(
            Arc::new(FailingEmbedder { status: 429 }),
            Arc::new(RecordingModel::default()),
            SessionOptions::default(),
        );
        session.bind("brochure", brochure_index().await?)?;

        let error = match session.ask("price?").await {
            Err(error) => error,
            Ok(answer) => panic!("unexpected answer {answer}"),
        };
        assert!(matches!(error, SessionError::Retrieval(IndexError::Embedding(_))));
        assert!(error.is_retryable());
        assert_eq!(session.history().await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_questions_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let model = Arc::new(RecordingModel::with_delay(Duration::from_millis(300)));
        let session = Arc::new(session_with(model));
        session.bind("brochure", brochure_index().await?)?;

        let in_flight = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.ask("What is the price?").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(session.state(), SessionState::Answering);
        assert!(matches!(session.ask("And the pool?").await, Err(SessionError::Busy)));
        assert!(matches!(session.reset(), Err(SessionError::Busy)));

        in_flight.await??;
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.history().await.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn unbound_session_cannot_answer() {
        let session = session_with(Arc::new(RecordingModel::default()));
        assert_eq!(session.state(), SessionState::Uninitialized);
        assert!(matches!(session.ask("hello?").await, Err(SessionError::Uninitialized)));
        assert!(matches!(session.ask("   ").await, Err(SessionError::EmptyQuestion)));
        assert!(session.history().await.is_empty());
    }

    #[tokio::test]
    async fn reset_and_rebind_clear_history() -> Result<(), Box<dyn std::error::Error>> {
        let session = session_with(Arc::new(RecordingModel::default()));
        session.bind("brochure", brochure_index().await?)?;

        session.ask("What is the price?").await?;
        session.reset()?;
        assert!(session.history().await.is_empty());
        assert_eq!(session.document_id().await.as_deref(), Some("brochure"));

        session.ask("What is the price?").await?;
        session.bind("price_list", brochure_index().await?)?;
        assert!(session.history().await.is_empty());
        assert_eq!(session.document_id().await.as_deref(), Some("price_list"));
        Ok(())
    }

    #[tokio::test]
    async fn binding_an_index_from_another_model_fails_fast() -> Result<(), Box<dyn std::error::Error>> {
        let session = ConversationSession::new(
            Arc::new(CharacterNgramEmbedder::new(64)),
            Arc::new(RecordingModel::default()),
            SessionOptions::default(),
        );

        let result = session.bind("brochure", brochure_index().await?);
        assert!(matches!(
            result,
            Err(SessionError::Retrieval(IndexError::ModelMismatch { .. }))
        ));
        assert_eq!(session.state(), SessionState::Uninitialized);
        Ok(())
    }
}
