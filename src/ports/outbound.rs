//! Outbound ports. Application calls into infrastructure.
//!
//! Implemented by adapters.

use crate::domain::{
    ChatInfo, ChatLookupError, ChatQuery, ChatRef, DeliveryAttempt, DeliveryError, DeliveryStats,
    DomainError, GroupListing, NewPost, PostStatus, ScheduledPost, SubscribeOutcome,
    SubscribedChat, Suggestion, SuggestionRequest,
};
use chrono::{DateTime, Utc};

/// Messaging platform gateway. Resolve chats and deliver messages.
#[async_trait::async_trait]
pub trait ChatGateway: Send + Sync {
    /// Fetch live title/description for an explicit identifier. Member count is
    /// best-effort and comes back as `None` if only that part failed.
    async fn resolve_chat(&self, chat: &ChatRef) -> Result<ChatInfo, ChatLookupError>;

    /// Deliver one text message to one chat.
    async fn send_message(&self, chat: &ChatRef, text: &str) -> Result<(), DeliveryError>;

    /// Resolve raw user input. Free text is rejected with `UnsupportedQuery`;
    /// callers fall back to the group directory.
    async fn resolve_query(&self, query: &str) -> Result<ChatInfo, ChatLookupError> {
        match ChatQuery::classify(query) {
            ChatQuery::Explicit(chat) => self.resolve_chat(&chat).await,
            ChatQuery::FreeText(text) => Err(ChatLookupError::UnsupportedQuery(text)),
        }
    }
}

/// Durable chat id -> subscription record mapping. No network calls.
#[async_trait::async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Insert unless the chat is already present; re-subscribing is a no-op success.
    async fn subscribe(&self, chat: &SubscribedChat) -> Result<SubscribeOutcome, DomainError>;

    /// Remove the record. `NotFound` (and no side effects) if absent.
    async fn unsubscribe(&self, chat: &ChatRef) -> Result<(), DomainError>;

    async fn list_subscribed_ids(&self) -> Result<Vec<ChatRef>, DomainError>;

    async fn list_subscriptions(&self) -> Result<Vec<SubscribedChat>, DomainError>;
}

/// Durable queue of scheduled posts and their per-target attempts.
///
/// All status changes go through here so the monotonic `pending -> terminal`
/// rule is enforced in one place.
#[async_trait::async_trait]
pub trait PostStore: Send + Sync {
    /// Validate, assign an id, and persist as `pending`.
    async fn create(&self, post: &NewPost, now: DateTime<Utc>)
    -> Result<ScheduledPost, DomainError>;

    async fn get(&self, post_id: &str) -> Result<ScheduledPost, DomainError>;

    /// Most recently scheduled first.
    async fn list_recent(&self, limit: u32) -> Result<Vec<ScheduledPost>, DomainError>;

    /// Pending posts with `scheduled_at <= as_of`. Terminal and cancelled posts never appear.
    async fn list_due(&self, as_of: DateTime<Utc>) -> Result<Vec<ScheduledPost>, DomainError>;

    /// Take an exclusive lease on a pending post. Returns false if another owner
    /// holds an unexpired lease or the post is no longer pending.
    async fn claim(
        &self,
        post_id: &str,
        owner: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool, DomainError>;

    /// Upsert the attempt for `(post_id, attempt.target)`. A success is never
    /// overwritten; a repeated failure increments `tries`. Returns the stored row.
    /// Fails with `PostClosed` once the post has left `pending`.
    async fn record_attempt(
        &self,
        post_id: &str,
        attempt: &DeliveryAttempt,
    ) -> Result<DeliveryAttempt, DomainError>;

    /// Set the post's status and release `owner`'s lease. Only a `pending` post
    /// that is unclaimed or claimed by `owner` may change; passing `Pending`
    /// just stamps `processed_at`.
    async fn finalize_status(
        &self,
        post_id: &str,
        owner: &str,
        status: PostStatus,
        processed_at: DateTime<Utc>,
    ) -> Result<(), DomainError>;

    /// Move an unclaimed pending post to `cancelled`.
    async fn cancel(&self, post_id: &str, now: DateTime<Utc>) -> Result<(), DomainError>;

    async fn delivery_stats(&self) -> Result<Vec<DeliveryStats>, DomainError>;
}

/// Generative text backend producing a short improvement suggestion.
#[async_trait::async_trait]
pub trait SuggestionPort: Send + Sync {
    async fn suggest(&self, request: &SuggestionRequest) -> Result<Suggestion, DomainError>;
}

/// Alternate data source for group listings when the platform cannot answer.
pub trait GroupDirectory: Send + Sync {
    /// Case-insensitive match on title or description.
    fn search(&self, query: &str) -> Vec<GroupListing>;

    fn find(&self, chat: &ChatRef) -> Option<GroupListing>;

    /// Every listing, shown when a lookup fails and nothing matches.
    fn all(&self) -> Vec<GroupListing>;
}
