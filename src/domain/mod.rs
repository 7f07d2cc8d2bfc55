//! Core domain layer. No external I/O dependencies.
//!
//! Entities and business rules live here. Dependencies flow inward.

pub mod entities;
pub mod errors;

pub use entities::{
    AttemptOutcome, ChatInfo, ChatKind, ChatQuery, ChatRef, DeliveryAttempt, DeliveryStats,
    GroupListing, ListingSource, MAX_MESSAGE_CHARS, NewPost, PostStatus, ScheduledPost,
    SubscribeOutcome, SubscribeStatus, SubscribedChat, Suggestion, SuggestionRequest,
};
pub use errors::{ChatLookupError, DeliveryError, DeliveryErrorKind, DomainError};
