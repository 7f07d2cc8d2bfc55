//! OpenAI-compatible adapter for post suggestions.
//!
//! Supports OpenAI API, Azure OpenAI, and local Ollama instances.
//! Implements `SuggestionPort` with JSON-mode output and markdown stripping.

use crate::domain::{DomainError, Suggestion, SuggestionRequest};
use crate::ports::SuggestionPort;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// OpenAI-compatible suggestion adapter.
///
/// Can be configured to work with:
/// - OpenAI API (api.openai.com)
/// - Azure OpenAI
/// - Ollama (localhost)
/// - Any OpenAI-compatible API
pub struct OpenAiAdapter {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl OpenAiAdapter {
    /// Create a new OpenAI adapter.
    ///
    /// # Arguments
    /// * `api_url` - API endpoint (e.g., "https://api.openai.com/v1/chat/completions")
    /// * `api_key` - API key (can be empty for local Ollama)
    /// * `model` - Model name (e.g., "gpt-4o-mini", "llama3.2")
    pub fn new(api_url: String, api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
            api_key,
            model,
        }
    }

    fn system_prompt() -> &'static str {
        r#"You are a social media marketing expert who specialises in optimising posts for Telegram groups and channels.

Analyse the message content and the target audience information. Give ONE concise suggestion (2-3 sentences at most) to improve the post.
The suggestion may cover:
- The best time to publish for that audience.
- Wording changes that increase engagement.
- Adding a call to action.
- The tone of the message.

Example suggestion: "For a tech group, try posting this in the late afternoon. You could also add a direct question such as 'What do you think of this update?' to spark discussion."

## Output Format
You MUST respond with valid JSON only. No markdown, no explanations outside JSON.

{"suggestion": "your 2-3 sentence suggestion"}"#
    }

    fn user_prompt(request: &SuggestionRequest) -> String {
        format!(
            "Message content:\n{}\n\nTarget audience:\n{}",
            request.message_content, request.target_audience_info
        )
    }

    /// Sanitize JSON response from LLM.
    ///
    /// LLMs sometimes wrap JSON in markdown code blocks. This strips them.
    fn sanitize_json(raw_text: &str) -> String {
        let trimmed = raw_text.trim();

        // ```json ... ``` or ``` ... ```
        if trimmed.starts_with("```") {
            let without_prefix = trimmed
                .strip_prefix("```json")
                .or_else(|| trimmed.strip_prefix("```"))
                .unwrap_or(trimmed);

            if let Some(end_idx) = without_prefix.rfind("```") {
                return without_prefix[..end_idx].trim().to_string();
            }
            return without_prefix.trim().to_string();
        }

        // Prose around the object
        if let Some(start) = trimmed.find('{') {
            if let Some(end) = trimmed.rfind('}') {
                if start < end {
                    return trimmed[start..=end].to_string();
                }
            }
        }

        trimmed.to_string()
    }

    /// Extract the suggestion text from the model's message content.
    fn parse_suggestion(raw_content: &str) -> Result<Suggestion, DomainError> {
        let clean_json = Self::sanitize_json(raw_content);
        let parsed: LlmSuggestion = serde_json::from_str(&clean_json).map_err(|e| {
            warn!(error = %e, json = %clean_json.chars().take(200).collect::<String>(), "JSON parse failed");
            DomainError::Generation(format!("model returned no structured output: {}", e))
        })?;
        let suggestion = parsed.suggestion.trim().to_string();
        if suggestion.is_empty() {
            return Err(DomainError::Generation(
                "model returned an empty suggestion".to_string(),
            ));
        }
        Ok(Suggestion { suggestion })
    }
}

/// OpenAI API request structure.
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

/// OpenAI API response structure.
#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    content: Option<String>,
}

#[derive(Deserialize)]
struct LlmSuggestion {
    suggestion: String,
}

#[async_trait::async_trait]
impl SuggestionPort for OpenAiAdapter {
    async fn suggest(&self, request: &SuggestionRequest) -> Result<Suggestion, DomainError> {
        info!(
            content_len = request.message_content.len(),
            model = %self.model,
            "requesting post suggestion"
        );

        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: Self::system_prompt().to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: Self::user_prompt(request),
                },
            ],
            temperature: 0.7,
            response_format: Some(ResponseFormat {
                format_type: "json_object".to_string(),
            }),
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| DomainError::Generation(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %text, "AI API returned error");
            return Err(DomainError::Generation(format!(
                "API error {}: {}",
                status,
                text.chars().take(200).collect::<String>()
            )));
        }

        let chat_response: ChatResponse = response.json().await.map_err(|e| {
            DomainError::Generation(format!("Failed to parse API response: {}", e))
        })?;

        let raw_content = chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| DomainError::Generation("No response choices returned".to_string()))?;

        debug!(raw_len = raw_content.len(), "received AI response");

        let suggestion = Self::parse_suggestion(&raw_content)?;
        info!(
            suggestion_len = suggestion.suggestion.len(),
            "post suggestion ready"
        );
        Ok(suggestion)
    }
}
