//! Join/leave use case. Verifies chats live when possible and records them
//! in the SubscriptionStore.

use crate::domain::{
    ChatQuery, ChatRef, DomainError, SubscribeOutcome, SubscribedChat,
};
use crate::ports::{ChatGateway, GroupDirectory, SubscriptionStore};
use crate::usecases::group_search_service::resolve_with_timeout;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct SubscriptionService {
    gateway: Arc<dyn ChatGateway>,
    directory: Arc<dyn GroupDirectory>,
    store: Arc<dyn SubscriptionStore>,
    lookup_timeout: Duration,
}

impl SubscriptionService {
    pub fn new(
        gateway: Arc<dyn ChatGateway>,
        directory: Arc<dyn GroupDirectory>,
        store: Arc<dyn SubscriptionStore>,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            directory,
            store,
            lookup_timeout,
        }
    }

    /// Subscribe to an `@handle` or numeric id. A live lookup stores a verified
    /// record keyed by the numeric id. If the lookup fails, a fallback listing
    /// with the same handle is stored unverified; otherwise the lookup error is
    /// returned and nothing is written.
    pub async fn join(&self, query: &str) -> Result<SubscribeOutcome, DomainError> {
        let chat = match ChatQuery::classify(query) {
            ChatQuery::Explicit(chat) => chat,
            ChatQuery::FreeText(text) => {
                return Err(DomainError::Validation(format!(
                    "'{}' is not an @handle or numeric chat id",
                    text
                )));
            }
        };

        let now = Utc::now();
        let record = match resolve_with_timeout(self.gateway.as_ref(), &chat, self.lookup_timeout)
            .await
        {
            Ok(info) => SubscribedChat::verified(info, now),
            Err(e) => match self.directory.find(&chat) {
                Some(listing) => {
                    warn!(chat = %chat, error = %e, "live lookup failed; subscribing from fallback listing");
                    SubscribedChat::unverified(listing, now)
                }
                None => return Err(e.into()),
            },
        };

        let outcome = self.store.subscribe(&record).await?;
        info!(
            chat = %record.chat,
            status = ?outcome.status,
            verified = outcome.verified,
            "join processed"
        );
        Ok(outcome)
    }

    /// Remove a subscription by its stored key. `NotFound` if absent.
    pub async fn leave(&self, chat: &ChatRef) -> Result<(), DomainError> {
        self.store.unsubscribe(chat).await
    }

    pub async fn list(&self) -> Result<Vec<SubscribedChat>, DomainError> {
        self.store.list_subscriptions().await
    }
}
