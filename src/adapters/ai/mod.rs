//! Suggestion backends. Implement SuggestionPort.
//!
//! OpenAI-compatible chat-completions adapter, plus a mock for running without a key.

pub mod mock_adapter;
pub mod openai_adapter;

pub use mock_adapter::MockSuggestionAdapter;
pub use openai_adapter::OpenAiAdapter;
