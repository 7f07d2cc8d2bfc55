//! Domain entities. Pure data structures for the core business.
//!
//! No Bot API or SQL types here; these are mapped from adapters.

use crate::domain::errors::{ChatLookupError, DeliveryError, DomainError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Bot API `sendMessage` text limit, in characters.
pub const MAX_MESSAGE_CHARS: usize = 4096;

/// Public usernames are 5..=32 characters of `[A-Za-z0-9_]`.
const HANDLE_MIN: usize = 5;
const HANDLE_MAX: usize = 32;

/// Identifier of a Telegram chat: numeric id (groups and channels are negative)
/// or a public `@handle`. Handles are stored lowercase without the `@`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ChatRef {
    Id(i64),
    Handle(String),
}

impl ChatRef {
    /// Parse an explicit identifier. Returns `None` for anything that is neither
    /// a well-formed `@handle` nor a signed integer.
    pub fn parse(input: &str) -> Option<Self> {
        let s = input.trim();
        if let Some(name) = s.strip_prefix('@') {
            let valid = (HANDLE_MIN..=HANDLE_MAX).contains(&name.len())
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            return valid.then(|| ChatRef::Handle(name.to_ascii_lowercase()));
        }
        s.parse::<i64>().ok().map(ChatRef::Id)
    }
}

impl fmt::Display for ChatRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatRef::Id(id) => write!(f, "{}", id),
            ChatRef::Handle(name) => write!(f, "@{}", name),
        }
    }
}

impl FromStr for ChatRef {
    type Err = ChatLookupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChatRef::parse(s).ok_or_else(|| ChatLookupError::UnsupportedQuery(s.trim().to_string()))
    }
}

impl From<ChatRef> for String {
    fn from(chat: ChatRef) -> Self {
        chat.to_string()
    }
}

impl TryFrom<String> for ChatRef {
    type Error = ChatLookupError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// What the user typed into a search or join box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatQuery {
    /// `@handle` or numeric id: eligible for a direct platform lookup.
    Explicit(ChatRef),
    /// Anything else. The Bot API has no public group search, so this is served
    /// from the fallback directory.
    FreeText(String),
}

impl ChatQuery {
    pub fn classify(input: &str) -> Self {
        match ChatRef::parse(input) {
            Some(chat) => ChatQuery::Explicit(chat),
            None => ChatQuery::FreeText(input.trim().to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

/// Live chat metadata as reported by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatInfo {
    pub id: i64,
    pub kind: ChatKind,
    pub title: String,
    pub username: Option<String>,
    pub description: Option<String>,
    /// Best-effort: `None` when the member-count call failed independently.
    pub member_count: Option<u64>,
    /// Platform file id of the small chat photo.
    pub avatar: Option<String>,
}

/// A group or channel the dashboard manages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribedChat {
    pub chat: ChatRef,
    pub title: String,
    pub member_count: Option<u64>,
    pub description: String,
    pub avatar: Option<String>,
    pub subscribed_at: DateTime<Utc>,
    /// True when the identity was confirmed against the live platform at subscribe time.
    pub verified: bool,
}

impl SubscribedChat {
    /// Record backed by a successful live lookup. Keyed by the numeric id so that
    /// `@handle` and id subscriptions of the same chat collapse into one record.
    pub fn verified(info: ChatInfo, at: DateTime<Utc>) -> Self {
        Self {
            chat: ChatRef::Id(info.id),
            title: info.title,
            member_count: info.member_count,
            description: info.description.unwrap_or_default(),
            avatar: info.avatar,
            subscribed_at: at,
            verified: true,
        }
    }

    /// Record built from fallback listing data; not confirmed by the platform.
    pub fn unverified(listing: GroupListing, at: DateTime<Utc>) -> Self {
        Self {
            chat: listing.chat,
            title: listing.title,
            member_count: listing.member_count,
            description: listing.description,
            avatar: listing.avatar,
            subscribed_at: at,
            verified: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscribeStatus {
    Created,
    AlreadyPresent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeOutcome {
    pub status: SubscribeStatus,
    pub verified: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingSource {
    Live,
    Fallback,
}

/// A search result row. `source` tells the presentation layer whether the data
/// came from the platform or from the labelled fallback set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupListing {
    pub chat: ChatRef,
    pub title: String,
    pub member_count: Option<u64>,
    pub description: String,
    pub avatar: Option<String>,
    pub source: ListingSource,
}

impl GroupListing {
    pub fn live(info: ChatInfo) -> Self {
        Self {
            chat: ChatRef::Id(info.id),
            title: info.title,
            member_count: info.member_count,
            description: info.description.unwrap_or_default(),
            avatar: info.avatar,
            source: ListingSource::Live,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Pending,
    Sent,
    PartiallySent,
    Failed,
    Cancelled,
}

impl PostStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PostStatus::Pending => "pending",
            PostStatus::Sent => "sent",
            PostStatus::PartiallySent => "partially_sent",
            PostStatus::Failed => "failed",
            PostStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        self != PostStatus::Pending
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PostStatus::Pending),
            "sent" => Ok(PostStatus::Sent),
            "partially_sent" => Ok(PostStatus::PartiallySent),
            "failed" => Ok(PostStatus::Failed),
            "cancelled" => Ok(PostStatus::Cancelled),
            other => Err(DomainError::store(
                "decode post status",
                format!("unknown status '{}'", other),
            )),
        }
    }
}

/// Scheduler form submission, before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPost {
    pub content: String,
    pub targets: Vec<ChatRef>,
    pub scheduled_at: DateTime<Utc>,
    /// Requested AI-optimised timing. Recorded only; nothing acts on it.
    #[serde(default)]
    pub optimal_timing: bool,
}

impl NewPost {
    /// Reject malformed input before any store mutation.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.content.trim().is_empty() {
            return Err(DomainError::Validation(
                "message content must not be empty".into(),
            ));
        }
        let chars = self.content.chars().count();
        if chars > MAX_MESSAGE_CHARS {
            return Err(DomainError::Validation(format!(
                "message is {} characters; the limit is {}",
                chars, MAX_MESSAGE_CHARS
            )));
        }
        if self.targets.is_empty() {
            return Err(DomainError::Validation(
                "select at least one group or channel".into(),
            ));
        }
        let mut seen = HashSet::with_capacity(self.targets.len());
        for target in &self.targets {
            if !seen.insert(target) {
                return Err(DomainError::Validation(format!(
                    "target {} is listed more than once",
                    target
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Success,
    Failed,
}

impl AttemptOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::Failed => "failed",
        }
    }
}

/// Outcome of sending one post to one target. At most one per (post, target);
/// retries of a transient failure bump `tries` on the same record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub target: ChatRef,
    pub outcome: AttemptOutcome,
    /// Failed with a transient/timeout error; a later run may try again.
    pub retryable: bool,
    pub error: Option<String>,
    pub tries: u32,
    pub sent_at: DateTime<Utc>,
}

impl DeliveryAttempt {
    pub fn from_result(
        target: ChatRef,
        result: &Result<(), DeliveryError>,
        at: DateTime<Utc>,
    ) -> Self {
        match result {
            Ok(()) => Self {
                target,
                outcome: AttemptOutcome::Success,
                retryable: false,
                error: None,
                tries: 1,
                sent_at: at,
            },
            Err(e) => Self {
                target,
                outcome: AttemptOutcome::Failed,
                retryable: e.is_retryable(),
                error: Some(e.to_string()),
                tries: 1,
                sent_at: at,
            },
        }
    }

    /// No further send will be made for this target.
    pub fn is_settled(&self, max_tries: u32) -> bool {
        self.outcome == AttemptOutcome::Success || !self.retryable || self.tries >= max_tries
    }
}

/// A post in the delivery queue, with its audit trail of attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledPost {
    pub id: String,
    pub content: String,
    pub targets: Vec<ChatRef>,
    pub scheduled_at: DateTime<Utc>,
    pub optimal_timing: bool,
    pub status: PostStatus,
    pub created_at: DateTime<Utc>,
    pub last_processed_at: Option<DateTime<Utc>>,
    /// Ordered like `targets`; only targets that have been attempted appear.
    pub attempts: Vec<DeliveryAttempt>,
}

impl ScheduledPost {
    pub fn attempt_for(&self, target: &ChatRef) -> Option<&DeliveryAttempt> {
        self.attempts.iter().find(|a| &a.target == target)
    }

    /// Targets that still need a send: never attempted, or failed transiently
    /// with tries left.
    pub fn targets_to_send(&self, max_tries: u32) -> Vec<ChatRef> {
        self.targets
            .iter()
            .filter(|t| !self.attempt_for(t).is_some_and(|a| a.is_settled(max_tries)))
            .cloned()
            .collect()
    }

    /// Aggregate status implied by the attempts. `Pending` while any target is
    /// unattempted or still retryable.
    pub fn settled_status(&self, max_tries: u32) -> PostStatus {
        let mut delivered = 0usize;
        let mut failed = 0usize;
        for target in &self.targets {
            match self.attempt_for(target) {
                Some(a) if a.outcome == AttemptOutcome::Success => delivered += 1,
                Some(a) if a.is_settled(max_tries) => failed += 1,
                _ => return PostStatus::Pending,
            }
        }
        match (delivered, failed) {
            (_, 0) => PostStatus::Sent,
            (0, _) => PostStatus::Failed,
            _ => PostStatus::PartiallySent,
        }
    }
}

/// Per-target totals over the whole audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStats {
    pub target: ChatRef,
    pub delivered: u64,
    pub failed: u64,
}

/// Input of the post-improvement suggestion call. Field names match the
/// generation backend's wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionRequest {
    pub message_content: String,
    pub target_audience_info: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub suggestion: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::DeliveryErrorKind;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn post(targets: &[&str], attempts: Vec<DeliveryAttempt>) -> ScheduledPost {
        ScheduledPost {
            id: "p1".into(),
            content: "hello".into(),
            targets: targets.iter().map(|t| t.parse().unwrap()).collect(),
            scheduled_at: at(100),
            optimal_timing: false,
            status: PostStatus::Pending,
            created_at: at(0),
            last_processed_at: None,
            attempts,
        }
    }

    fn attempt(target: &str, result: Result<(), DeliveryError>) -> DeliveryAttempt {
        DeliveryAttempt::from_result(target.parse().unwrap(), &result, at(200))
    }

    fn denied(chat: &str) -> DeliveryError {
        DeliveryError::new(chat, DeliveryErrorKind::Permission, "Forbidden: bot was kicked")
    }

    fn flaky(chat: &str) -> DeliveryError {
        DeliveryError::new(chat, DeliveryErrorKind::Transient, "Too Many Requests")
    }

    #[test]
    fn test_chat_ref_parses_handles_and_signed_ids() {
        assert_eq!(
            ChatRef::parse("@Known_Public_Channel"),
            Some(ChatRef::Handle("known_public_channel".into()))
        );
        assert_eq!(
            ChatRef::parse(" -1001234567890 "),
            Some(ChatRef::Id(-1001234567890))
        );
        assert_eq!(ChatRef::parse("@abc"), None);
        assert_eq!(ChatRef::parse("@bad-name"), None);
        assert_eq!(ChatRef::parse("tech news"), None);
    }

    #[test]
    fn test_chat_ref_string_form_round_trips_through_serde() {
        let chat = ChatRef::Handle("rustlang".into());
        let json = serde_json::to_string(&chat).unwrap();
        assert_eq!(json, "\"@rustlang\"");
        let back: ChatRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, chat);
    }

    #[test]
    fn test_query_classification() {
        assert_eq!(
            ChatQuery::classify("@rust_news"),
            ChatQuery::Explicit(ChatRef::Handle("rust_news".into()))
        );
        assert_eq!(
            ChatQuery::classify("  tech news "),
            ChatQuery::FreeText("tech news".into())
        );
    }

    #[test]
    fn test_new_post_validation() {
        let ok = NewPost {
            content: "Launch day!".into(),
            targets: vec![ChatRef::Id(-1), ChatRef::Handle("channel".into())],
            scheduled_at: at(100),
            optimal_timing: false,
        };
        assert!(ok.validate().is_ok());

        let empty = NewPost {
            content: "   ".into(),
            ..ok.clone()
        };
        assert!(matches!(empty.validate(), Err(DomainError::Validation(_))));

        let too_long = NewPost {
            content: "x".repeat(MAX_MESSAGE_CHARS + 1),
            ..ok.clone()
        };
        assert!(matches!(too_long.validate(), Err(DomainError::Validation(_))));

        let at_limit = NewPost {
            content: "é".repeat(MAX_MESSAGE_CHARS),
            ..ok.clone()
        };
        assert!(at_limit.validate().is_ok());

        let no_targets = NewPost {
            targets: vec![],
            ..ok.clone()
        };
        assert!(matches!(no_targets.validate(), Err(DomainError::Validation(_))));

        let duplicated = NewPost {
            targets: vec![ChatRef::Id(-1), ChatRef::Id(-1)],
            ..ok
        };
        assert!(matches!(duplicated.validate(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn test_settled_status_rules() {
        let all_ok = post(&["-1", "-2"], vec![attempt("-1", Ok(())), attempt("-2", Ok(()))]);
        assert_eq!(all_ok.settled_status(3), PostStatus::Sent);

        let mixed = post(
            &["-1", "-2"],
            vec![attempt("-1", Ok(())), attempt("-2", Err(denied("-2")))],
        );
        assert_eq!(mixed.settled_status(3), PostStatus::PartiallySent);

        let all_denied = post(
            &["-1", "-2"],
            vec![
                attempt("-1", Err(denied("-1"))),
                attempt("-2", Err(denied("-2"))),
            ],
        );
        assert_eq!(all_denied.settled_status(3), PostStatus::Failed);

        let unattempted = post(&["-1", "-2"], vec![attempt("-1", Ok(()))]);
        assert_eq!(unattempted.settled_status(3), PostStatus::Pending);
    }

    #[test]
    fn test_transient_failures_stay_open_until_tries_run_out() {
        let mut retry = attempt("-2", Err(flaky("-2")));
        let p = post(&["-1", "-2"], vec![attempt("-1", Ok(())), retry.clone()]);
        assert_eq!(p.settled_status(3), PostStatus::Pending);
        assert_eq!(p.targets_to_send(3), vec![ChatRef::Id(-2)]);

        retry.tries = 3;
        let p = post(&["-1", "-2"], vec![attempt("-1", Ok(())), retry]);
        assert_eq!(p.settled_status(3), PostStatus::PartiallySent);
        assert!(p.targets_to_send(3).is_empty());
    }
}
