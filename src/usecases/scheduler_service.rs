//! Scheduling use case: create, cancel and inspect posts; delivery analytics
//! and the CSV audit export.

use crate::adapters::report::write_report;
use crate::domain::{DeliveryStats, DomainError, NewPost, ScheduledPost};
use crate::ports::{PostStore, SubscriptionStore};
use chrono::Utc;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub struct SchedulerService {
    posts: Arc<dyn PostStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
}

impl SchedulerService {
    pub fn new(posts: Arc<dyn PostStore>, subscriptions: Arc<dyn SubscriptionStore>) -> Self {
        Self {
            posts,
            subscriptions,
        }
    }

    /// Validate and queue a post as `pending`. Targets that are not subscribed
    /// are allowed but logged.
    pub async fn schedule(&self, post: NewPost) -> Result<ScheduledPost, DomainError> {
        post.validate()?;

        let known: HashSet<_> = self
            .subscriptions
            .list_subscribed_ids()
            .await?
            .into_iter()
            .collect();
        for target in post.targets.iter().filter(|t| !known.contains(*t)) {
            warn!(chat = %target, "scheduling to a chat that is not subscribed");
        }

        let created = self.posts.create(&post, Utc::now()).await?;
        if created.scheduled_at < created.created_at {
            info!(post_id = %created.id, "scheduled time already passed; due on the next dispatcher run");
        }
        Ok(created)
    }

    pub async fn cancel(&self, post_id: &str) -> Result<(), DomainError> {
        self.posts.cancel(post_id, Utc::now()).await
    }

    pub async fn get(&self, post_id: &str) -> Result<ScheduledPost, DomainError> {
        self.posts.get(post_id).await
    }

    pub async fn list_recent(&self, limit: u32) -> Result<Vec<ScheduledPost>, DomainError> {
        self.posts.list_recent(limit).await
    }

    pub async fn delivery_stats(&self) -> Result<Vec<DeliveryStats>, DomainError> {
        self.posts.delivery_stats().await
    }

    /// Write the attempts of the `limit` most recent posts to a CSV under `reports_dir`.
    pub async fn export_report(
        &self,
        reports_dir: &Path,
        limit: u32,
    ) -> Result<PathBuf, DomainError> {
        let posts = self.posts.list_recent(limit).await?;
        write_report(reports_dir, &posts, Utc::now()).await
    }
}
