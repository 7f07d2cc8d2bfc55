//! Mock suggestion adapter for running without an API key.
//!
//! Returns a canned suggestion derived from the input.

use crate::domain::{DomainError, Suggestion, SuggestionRequest};
use crate::ports::SuggestionPort;
use std::time::Duration;
use tracing::info;

/// Returns predetermined suggestions without making API calls.
/// Simulates network latency with configurable delay.
pub struct MockSuggestionAdapter {
    /// Simulated network delay in milliseconds.
    delay_ms: u64,
}

impl MockSuggestionAdapter {
    /// Create a new mock adapter with default delay (100ms).
    pub fn new() -> Self {
        Self { delay_ms: 100 }
    }

    pub fn with_delay(delay_ms: u64) -> Self {
        Self { delay_ms }
    }
}

impl Default for MockSuggestionAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SuggestionPort for MockSuggestionAdapter {
    async fn suggest(&self, request: &SuggestionRequest) -> Result<Suggestion, DomainError> {
        info!(
            content_len = request.message_content.len(),
            "[MOCK] Simulating post suggestion"
        );

        tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;

        let ends_with_question = request.message_content.trim_end().ends_with('?');
        let call_to_action = if ends_with_question {
            "Pin the post for a few hours so replies keep coming in."
        } else {
            "Close with a direct question to invite replies."
        };

        Ok(Suggestion {
            suggestion: format!(
                "[MOCK] For {}, try publishing in the early evening when members are most active. {}",
                request.target_audience_info, call_to_action
            ),
        })
    }
}
