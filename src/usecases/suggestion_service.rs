//! Post-improvement suggestion use case. One attempt, bounded by a timeout;
//! failures go straight back to the caller.

use crate::domain::{DomainError, Suggestion, SuggestionRequest, MAX_MESSAGE_CHARS};
use crate::ports::SuggestionPort;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const DEFAULT_AUDIENCE: &str = "a generic audience";

pub struct SuggestionService {
    backend: Arc<dyn SuggestionPort>,
    timeout: Duration,
}

impl SuggestionService {
    pub fn new(backend: Arc<dyn SuggestionPort>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    pub async fn suggest(
        &self,
        message_content: &str,
        audience: &str,
    ) -> Result<Suggestion, DomainError> {
        if message_content.trim().is_empty() {
            return Err(DomainError::Validation(
                "message content must not be empty".into(),
            ));
        }
        if message_content.chars().count() > MAX_MESSAGE_CHARS {
            return Err(DomainError::Validation(format!(
                "message exceeds {} characters",
                MAX_MESSAGE_CHARS
            )));
        }
        let audience = audience.trim();
        let request = SuggestionRequest {
            message_content: message_content.to_string(),
            target_audience_info: if audience.is_empty() {
                DEFAULT_AUDIENCE.to_string()
            } else {
                audience.to_string()
            },
        };

        match tokio::time::timeout(self.timeout, self.backend.suggest(&request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "suggestion backend timed out");
                Err(DomainError::Generation(format!(
                    "no response within {}s",
                    self.timeout.as_secs()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ai::MockSuggestionAdapter;
    use std::sync::Mutex;

    /// Records the request it received.
    #[derive(Default)]
    struct Recording {
        seen: Mutex<Option<SuggestionRequest>>,
    }

    #[async_trait::async_trait]
    impl SuggestionPort for Recording {
        async fn suggest(&self, request: &SuggestionRequest) -> Result<Suggestion, DomainError> {
            *self.seen.lock().unwrap() = Some(request.clone());
            Ok(Suggestion {
                suggestion: "Post it at 6pm.".into(),
            })
        }
    }

    #[tokio::test]
    async fn test_empty_audience_defaults() {
        let backend = Arc::new(Recording::default());
        let svc = SuggestionService::new(backend.clone(), Duration::from_secs(1));
        let out = svc.suggest("We shipped v2", "   ").await.unwrap();
        assert_eq!(out.suggestion, "Post it at 6pm.");
        let seen = backend.seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen.target_audience_info, DEFAULT_AUDIENCE);
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected_before_calling_backend() {
        let backend = Arc::new(Recording::default());
        let svc = SuggestionService::new(backend.clone(), Duration::from_secs(1));
        assert!(matches!(
            svc.suggest("  ", "devs").await,
            Err(DomainError::Validation(_))
        ));
        assert!(backend.seen.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_slow_backend_times_out_as_generation_error() {
        let svc = SuggestionService::new(
            Arc::new(MockSuggestionAdapter::with_delay(500)),
            Duration::from_millis(20),
        );
        assert!(matches!(
            svc.suggest("hello", "devs").await,
            Err(DomainError::Generation(_))
        ));
    }
}
