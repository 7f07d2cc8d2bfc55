//! Map Bot API wire types to domain entities and errors.
//!
//! Error classification decides retry policy: rate limits and server/network
//! failures are transient; every other API rejection (bot kicked, blocked,
//! missing rights, chat gone, bad request) is final for that target.

use crate::domain::{
    ChatInfo, ChatKind, ChatLookupError, ChatRef, DeliveryError, DeliveryErrorKind,
};
use serde::Deserialize;

/// `{"ok": bool, "result": ..., "error_code": ..., "description": ...}`
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub error_code: Option<i64>,
    pub description: Option<String>,
    pub parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
pub struct ResponseParameters {
    pub retry_after: Option<u64>,
    pub migrate_to_chat_id: Option<i64>,
}

/// `getChat` result (ChatFullInfo), only the fields we use.
#[derive(Debug, Deserialize)]
pub struct ApiChat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: Option<String>,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub description: Option<String>,
    pub photo: Option<ApiChatPhoto>,
}

#[derive(Debug, Deserialize)]
pub struct ApiChatPhoto {
    pub small_file_id: String,
}

/// Failure of one Bot API call, before it is mapped to a domain error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiFailure {
    Timeout,
    Network(String),
    Api {
        code: i64,
        description: String,
        retry_after: Option<u64>,
    },
    Malformed(String),
}

impl ApiFailure {
    fn detail(&self) -> String {
        match self {
            ApiFailure::Timeout => "request timed out".to_string(),
            ApiFailure::Network(e) => format!("network error: {}", e),
            ApiFailure::Api {
                code,
                description,
                retry_after: Some(secs),
            } => format!("{} {} (retry after {}s)", code, description, secs),
            ApiFailure::Api {
                code, description, ..
            } => format!("{} {}", code, description),
            ApiFailure::Malformed(e) => format!("malformed response: {}", e),
        }
    }
}

/// Turn a decoded envelope into its result or an `ApiFailure::Api`.
/// `http_status` is used when the body carries no `error_code`.
pub fn unwrap_envelope<T>(envelope: ApiEnvelope<T>, http_status: u16) -> Result<T, ApiFailure> {
    if envelope.ok {
        if let Some(result) = envelope.result {
            return Ok(result);
        }
        return Err(ApiFailure::Malformed("ok response without result".into()));
    }
    let mut description = envelope
        .description
        .unwrap_or_else(|| "unknown error".to_string());
    let mut retry_after = None;
    if let Some(params) = envelope.parameters {
        retry_after = params.retry_after;
        if let Some(new_id) = params.migrate_to_chat_id {
            description = format!("{}; chat migrated to {}", description, new_id);
        }
    }
    Err(ApiFailure::Api {
        code: envelope.error_code.unwrap_or(i64::from(http_status)),
        description,
        retry_after,
    })
}

/// Bot API `chat_id` parameter: integer id or `@username` string.
pub fn chat_id_param(chat: &ChatRef) -> serde_json::Value {
    match chat {
        ChatRef::Id(id) => serde_json::Value::from(*id),
        ChatRef::Handle(_) => serde_json::Value::from(chat.to_string()),
    }
}

pub fn chat_kind(kind: &str) -> ChatKind {
    match kind {
        "private" => ChatKind::Private,
        "supergroup" => ChatKind::Supergroup,
        "channel" => ChatKind::Channel,
        _ => ChatKind::Group,
    }
}

pub fn chat_info(chat: ApiChat, member_count: Option<u64>) -> ChatInfo {
    let full_name = match (&chat.first_name, &chat.last_name) {
        (Some(first), Some(last)) => Some(format!("{} {}", first, last)),
        (Some(first), None) => Some(first.clone()),
        _ => None,
    };
    let title = chat
        .title
        .clone()
        .or(full_name)
        .or_else(|| chat.username.as_ref().map(|u| format!("@{}", u)))
        .unwrap_or_else(|| chat.id.to_string());
    ChatInfo {
        id: chat.id,
        kind: chat_kind(&chat.kind),
        title,
        username: chat.username,
        description: chat.description.filter(|d| !d.is_empty()),
        member_count,
        avatar: chat.photo.map(|p| p.small_file_id),
    }
}

/// 429 and 5xx are worth another try later; any other API error is final.
pub fn delivery_kind(code: i64) -> DeliveryErrorKind {
    match code {
        429 | 500..=599 => DeliveryErrorKind::Transient,
        _ => DeliveryErrorKind::Permission,
    }
}

pub fn delivery_error(chat: &ChatRef, failure: ApiFailure) -> DeliveryError {
    let kind = match &failure {
        ApiFailure::Timeout => DeliveryErrorKind::Timeout,
        ApiFailure::Network(_) | ApiFailure::Malformed(_) => DeliveryErrorKind::Transient,
        ApiFailure::Api { code, .. } => delivery_kind(*code),
    };
    DeliveryError::new(chat, kind, failure.detail())
}

pub fn lookup_error(chat: &ChatRef, failure: ApiFailure) -> ChatLookupError {
    let chat = chat.to_string();
    let detail = failure.detail();
    match failure {
        ApiFailure::Timeout => ChatLookupError::Timeout { chat },
        ApiFailure::Api { code: 400 | 403, .. } => ChatLookupError::NotFound { chat, detail },
        _ => ChatLookupError::Platform { chat, detail },
    }
}
