pub mod openai;

pub use openai::{OpenAiChatModel, OpenAiEmbedder};

use crate::ServiceError;
use std::future::Future;
use std::time::Duration;

pub const EMBEDDING_SERVICE: &str = "embedding";
pub const CHAT_SERVICE: &str = "chat";

/// Runs one external call under `limit`. The inner future is dropped on expiry,
/// so nothing it would have produced is observed by the caller.
pub async fn with_timeout<T, F>(service: &str, limit: Duration, call: F) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, ServiceError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ServiceError::Timeout {
            service: service.to_string(),
            after: limit,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::{with_timeout, EMBEDDING_SERVICE};
    use crate::ServiceError;
    use std::time::Duration;

    #[tokio::test]
    async fn slow_calls_fail_with_retryable_timeout() {
        let result: Result<(), ServiceError> =
            with_timeout(EMBEDDING_SERVICE, Duration::from_millis(10), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        match result {
            Err(error @ ServiceError::Timeout { .. }) => assert!(error.is_retryable()),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fast_calls_pass_through() {
        let result = with_timeout(EMBEDDING_SERVICE, Duration::from_secs(1), async {
            Ok::<_, ServiceError>(7)
        })
        .await;
        assert!(matches!(result, Ok(7)));
    }
}
