//! Domain errors. Used by ports and use cases.
//!
//! Adapters map infrastructure errors into these.

use crate::domain::entities::PostStatus;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    /// Malformed post or chat input; nothing was written.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    ChatLookup(#[from] ChatLookupError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    /// Suggestion backend failed or produced no structured output. Not retried.
    #[error("Suggestion generation failed: {0}")]
    Generation(String),

    /// Persistence failure. Callers must not assume any part of `op` was written.
    #[error("Store error during {op}: {detail}")]
    Store { op: &'static str, detail: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Post {post_id} cannot move from {from} to {to}")]
    InvalidTransition {
        post_id: String,
        from: PostStatus,
        to: PostStatus,
    },

    /// The post's lease expired and another dispatcher claimed it.
    #[error("Post {post_id} is no longer claimed by {owner}")]
    ClaimLost { post_id: String, owner: String },

    #[error("Post {post_id} is {status}; delivery attempts can no longer be recorded")]
    PostClosed { post_id: String, status: PostStatus },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Console input error: {0}")]
    Input(String),
}

impl DomainError {
    pub fn store(op: &'static str, detail: impl fmt::Display) -> Self {
        DomainError::Store {
            op,
            detail: detail.to_string(),
        }
    }
}

/// The platform could not resolve a chat identifier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatLookupError {
    #[error("'{0}' is not an @handle or numeric chat id; the Bot API has no free-text group search")]
    UnsupportedQuery(String),

    #[error("chat {chat} not found or not accessible to the bot: {detail}")]
    NotFound { chat: String, detail: String },

    #[error("lookup of chat {chat} failed: {detail}")]
    Platform { chat: String, detail: String },

    #[error("lookup of chat {chat} timed out")]
    Timeout { chat: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryErrorKind {
    /// Bot removed, blocked, lacks rights, or chat gone. Never retried.
    Permission,
    /// Rate limit, server or network failure.
    Transient,
    Timeout,
}

impl fmt::Display for DeliveryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeliveryErrorKind::Permission => "permission",
            DeliveryErrorKind::Transient => "transient",
            DeliveryErrorKind::Timeout => "timeout",
        })
    }
}

/// Sending one message to one chat failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("delivery to {chat} failed ({kind}): {detail}")]
pub struct DeliveryError {
    pub chat: String,
    pub kind: DeliveryErrorKind,
    pub detail: String,
}

impl DeliveryError {
    pub fn new(chat: impl fmt::Display, kind: DeliveryErrorKind, detail: impl Into<String>) -> Self {
        Self {
            chat: chat.to_string(),
            kind,
            detail: detail.into(),
        }
    }

    /// Transient and timeout failures are candidates for a later dispatcher run.
    pub fn is_retryable(&self) -> bool {
        self.kind != DeliveryErrorKind::Permission
    }
}
