//! Delivery dispatcher: sends due posts to their targets and advances post status.
//!
//! One run: list due posts, claim each one, send to every target that still
//! needs a send (bounded concurrency), record each outcome as it completes,
//! then finalize. A target that already succeeded is never sent again, so a run
//! that crashed before finalizing can be repeated safely.
//!
//! Overlapping runs in one process are refused by `run_guard`; across processes
//! the per-post claim lease keeps two dispatchers off the same post. The lease
//! is renewed as each send finishes, and the post is re-read after claiming so
//! attempts recorded by an earlier holder are honoured.

use crate::domain::{
    AttemptOutcome, ChatRef, DeliveryAttempt, DeliveryError, DeliveryErrorKind, DomainError,
    PostStatus, ScheduledPost,
};
use crate::ports::{ChatGateway, PostStore};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    /// Max concurrent sends within one post.
    pub concurrency: usize,
    /// Sends per target before a transient failure becomes final.
    pub max_tries: u32,
    /// How long a claim keeps other dispatchers away from a post.
    pub lease: Duration,
    /// Upper bound for one `send_message` call.
    pub send_timeout: Duration,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_tries: 3,
            lease: Duration::from_secs(300),
            send_timeout: Duration::from_secs(15),
        }
    }
}

impl DispatcherSettings {
    /// The lease is renewed after every finished send, so it has to outlast
    /// the slowest single send with room to spare.
    pub fn effective_lease(&self) -> Duration {
        self.lease.max(self.send_timeout * 2)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostReport {
    pub post_id: String,
    pub status: PostStatus,
    pub delivered: usize,
    pub failed: usize,
    /// Targets that failed transiently and will be tried again on a later run.
    pub retrying: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub posts: Vec<PostReport>,
    /// Due posts held by another dispatcher's lease.
    pub skipped: usize,
    /// `(post_id, error)` for posts whose processing hit a store failure.
    pub errors: Vec<(String, String)>,
}

impl DispatchReport {
    pub fn is_empty(&self) -> bool {
        self.posts.is_empty() && self.skipped == 0 && self.errors.is_empty()
    }
}

pub struct Dispatcher {
    gateway: Arc<dyn ChatGateway>,
    posts: Arc<dyn PostStore>,
    settings: DispatcherSettings,
    owner: String,
    run_guard: Mutex<()>,
}

impl Dispatcher {
    pub fn new(
        gateway: Arc<dyn ChatGateway>,
        posts: Arc<dyn PostStore>,
        settings: DispatcherSettings,
    ) -> Self {
        if settings.effective_lease() > settings.lease {
            warn!(
                lease_ms = settings.lease.as_millis() as u64,
                send_timeout_ms = settings.send_timeout.as_millis() as u64,
                "claim lease shorter than two send timeouts; extending it"
            );
        }
        Self {
            gateway,
            posts,
            settings,
            owner: format!("dispatcher-{}", Uuid::new_v4()),
            run_guard: Mutex::new(()),
        }
    }

    fn lease_until(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + chrono::Duration::from_std(self.settings.effective_lease())
            .unwrap_or_else(|_| chrono::Duration::minutes(5))
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Process every post due at `as_of`. Returns an empty report without doing
    /// anything if another run of this dispatcher is still in progress.
    pub async fn run_once(&self, as_of: DateTime<Utc>) -> Result<DispatchReport, DomainError> {
        let Ok(_guard) = self.run_guard.try_lock() else {
            debug!(owner = %self.owner, "dispatcher run already in progress; skipping");
            return Ok(DispatchReport::default());
        };

        let due = self.posts.list_due(as_of).await?;
        let mut report = DispatchReport::default();
        if due.is_empty() {
            debug!(as_of = %as_of, "no due posts");
            return Ok(report);
        }
        info!(due = due.len(), as_of = %as_of, "dispatching due posts");

        for listed in due {
            let now = Utc::now();
            match self
                .posts
                .claim(&listed.id, &self.owner, now, self.lease_until(now))
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    info!(post_id = %listed.id, "post is claimed elsewhere; skipping");
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    error!(post_id = %listed.id, error = %e, "claim failed");
                    report.errors.push((listed.id.clone(), e.to_string()));
                    continue;
                }
            }

            // Another dispatcher may have recorded attempts since `list_due`.
            let post = match self.posts.get(&listed.id).await {
                Ok(post) => post,
                Err(e) => {
                    error!(post_id = %listed.id, error = %e, "reloading claimed post failed");
                    report.errors.push((listed.id.clone(), e.to_string()));
                    continue;
                }
            };

            match self.process_post(&post).await {
                Ok(post_report) => report.posts.push(post_report),
                Err(e) => {
                    // Lease is left to expire; unrecorded targets are retried next run.
                    error!(post_id = %post.id, error = %e, "post processing failed");
                    report.errors.push((post.id.clone(), e.to_string()));
                }
            }
        }

        info!(
            processed = report.posts.len(),
            skipped = report.skipped,
            errors = report.errors.len(),
            "dispatcher run complete"
        );
        Ok(report)
    }

    /// Periodic trigger for daemon mode. Runs until the task is dropped.
    pub async fn run_loop(&self, interval: Duration) {
        info!(
            owner = %self.owner,
            interval_secs = interval.as_secs(),
            "dispatcher loop started"
        );
        loop {
            if let Err(e) = self.run_once(Utc::now()).await {
                warn!(error = %e, "dispatcher run failed");
            }
            tokio::time::sleep(interval).await;
        }
    }

    async fn process_post(&self, post: &ScheduledPost) -> Result<PostReport, DomainError> {
        let max_tries = self.settings.max_tries;
        let targets = post.targets_to_send(max_tries);
        let mut attempts: HashMap<ChatRef, DeliveryAttempt> = post
            .attempts
            .iter()
            .map(|a| (a.target.clone(), a.clone()))
            .collect();

        debug!(
            post_id = %post.id,
            to_send = targets.len(),
            already_recorded = attempts.len(),
            "processing post"
        );

        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let content: Arc<str> = Arc::from(post.content.as_str());
        let mut outstanding: HashSet<ChatRef> = targets.iter().cloned().collect();
        let mut sends = JoinSet::new();
        for target in targets.iter().cloned() {
            let gateway = Arc::clone(&self.gateway);
            let sem = Arc::clone(&semaphore);
            let content = Arc::clone(&content);
            let timeout = self.settings.send_timeout;
            sends.spawn(async move {
                let _permit = sem.acquire_owned().await.ok();
                let result = send_with_timeout(gateway.as_ref(), &target, &content, timeout).await;
                (target, result)
            });
        }

        // Outcomes are written one at a time from this task as sends finish,
        // and each one renews the lease.
        let mut store_error = None;
        let mut lease_lost = false;
        while let Some(joined) = sends.join_next().await {
            let (target, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) if e.is_cancelled() => continue,
                Err(e) => {
                    error!(post_id = %post.id, error = %e, "send task panicked");
                    continue;
                }
            };
            outstanding.remove(&target);
            if let Err(e) = self.record(&post.id, target, &result, &mut attempts).await {
                store_error.get_or_insert(e);
            }

            if lease_lost {
                continue;
            }
            let now = Utc::now();
            match self
                .posts
                .claim(&post.id, &self.owner, now, self.lease_until(now))
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    warn!(post_id = %post.id, owner = %self.owner, "lease lost; stopping remaining sends");
                    lease_lost = true;
                    sends.abort_all();
                }
                Err(e) => {
                    error!(post_id = %post.id, error = %e, "lease renewal failed");
                    store_error.get_or_insert(e);
                }
            }
        }
        if lease_lost {
            return Err(DomainError::ClaimLost {
                post_id: post.id.clone(),
                owner: self.owner.clone(),
            });
        }

        // A send task that panicked left no outcome; count it as a transient
        // failure so the target still runs out of tries.
        for target in targets.into_iter().filter(|t| outstanding.contains(t)) {
            let result = Err(DeliveryError::new(
                &target,
                DeliveryErrorKind::Transient,
                "send task panicked",
            ));
            if let Err(e) = self.record(&post.id, target, &result, &mut attempts).await {
                store_error.get_or_insert(e);
            }
        }
        if let Some(e) = store_error {
            return Err(e);
        }

        let mut settled = post.clone();
        settled.attempts = post
            .targets
            .iter()
            .filter_map(|t| attempts.get(t).cloned())
            .collect();
        let status = settled.settled_status(max_tries);
        self.posts
            .finalize_status(&post.id, &self.owner, status, Utc::now())
            .await?;

        let delivered = settled
            .attempts
            .iter()
            .filter(|a| a.outcome == AttemptOutcome::Success)
            .count();
        let retrying = settled
            .targets
            .iter()
            .filter(|t| !settled.attempt_for(t).is_some_and(|a| a.is_settled(max_tries)))
            .count();
        let failed = settled.targets.len() - delivered - retrying;

        info!(
            post_id = %post.id,
            status = %status,
            delivered,
            failed,
            retrying,
            "post processed"
        );
        Ok(PostReport {
            post_id: post.id.clone(),
            status,
            delivered,
            failed,
            retrying,
        })
    }

    async fn record(
        &self,
        post_id: &str,
        target: ChatRef,
        result: &Result<(), DeliveryError>,
        attempts: &mut HashMap<ChatRef, DeliveryAttempt>,
    ) -> Result<(), DomainError> {
        match result {
            Ok(()) => info!(post_id, chat = %target, "delivered"),
            Err(e) => warn!(
                post_id,
                chat = %target,
                kind = %e.kind,
                error = %e.detail,
                "delivery failed"
            ),
        }
        let attempt = DeliveryAttempt::from_result(target.clone(), result, Utc::now());
        match self.posts.record_attempt(post_id, &attempt).await {
            Ok(stored) => {
                attempts.insert(target, stored);
                Ok(())
            }
            Err(e) => {
                error!(post_id, chat = %target, error = %e, "recording attempt failed");
                Err(e)
            }
        }
    }
}

async fn send_with_timeout(
    gateway: &dyn ChatGateway,
    target: &ChatRef,
    text: &str,
    timeout: Duration,
) -> Result<(), DeliveryError> {
    match tokio::time::timeout(timeout, gateway.send_message(target, text)).await {
        Ok(result) => result,
        Err(_) => Err(DeliveryError::new(
            target,
            DeliveryErrorKind::Timeout,
            format!("no response within {}ms", timeout.as_millis()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::persistence::SqliteRepo;
    use crate::domain::{DeliveryStats, NewPost};
    use crate::usecases::test_support::{denied, due_post, flaky, minutes_ago, temp_repo, FakeGateway};

    fn dispatcher(gw: Arc<FakeGateway>, repo: Arc<SqliteRepo>) -> Dispatcher {
        Dispatcher::new(gw, repo, DispatcherSettings::default())
    }

    #[tokio::test]
    async fn test_mixed_outcome_is_partially_sent() {
        let (repo, _dir) = temp_repo().await;
        let repo = Arc::new(repo);
        let gw = Arc::new(FakeGateway::new().script("-2", vec![Err(denied("-2"))]));
        let post = repo.create(&due_post(&["-1", "-2"]), Utc::now()).await.unwrap();

        let report = dispatcher(Arc::clone(&gw), Arc::clone(&repo))
            .run_once(Utc::now())
            .await
            .unwrap();
        assert_eq!(report.posts.len(), 1);
        assert_eq!(report.posts[0].status, PostStatus::PartiallySent);
        assert_eq!((report.posts[0].delivered, report.posts[0].failed), (1, 1));

        let stored = repo.get(&post.id).await.unwrap();
        assert_eq!(stored.status, PostStatus::PartiallySent);
        assert!(stored.last_processed_at.is_some());
        assert_eq!(stored.attempts.len(), 2);
        assert_eq!(stored.attempts[0].target, ChatRef::Id(-1));
        assert_eq!(stored.attempts[0].outcome, AttemptOutcome::Success);
        assert_eq!(stored.attempts[1].target, ChatRef::Id(-2));
        assert_eq!(stored.attempts[1].outcome, AttemptOutcome::Failed);
        assert!(stored.attempts[1]
            .error
            .as_deref()
            .unwrap()
            .contains("bot was kicked"));
    }

    #[tokio::test]
    async fn test_all_success_is_sent_and_all_denied_is_failed() {
        let (repo, _dir) = temp_repo().await;
        let repo = Arc::new(repo);
        let gw = Arc::new(
            FakeGateway::new()
                .script("-3", vec![Err(denied("-3"))])
                .script("-4", vec![Err(denied("-4"))]),
        );
        let ok = repo.create(&due_post(&["-1", "-2"]), Utc::now()).await.unwrap();
        let bad = repo.create(&due_post(&["-3", "-4"]), Utc::now()).await.unwrap();

        dispatcher(Arc::clone(&gw), Arc::clone(&repo))
            .run_once(Utc::now())
            .await
            .unwrap();

        assert_eq!(repo.get(&ok.id).await.unwrap().status, PostStatus::Sent);
        let failed = repo.get(&bad.id).await.unwrap();
        assert_eq!(failed.status, PostStatus::Failed);
        assert_eq!(failed.attempts.len(), 2);
    }

    #[tokio::test]
    async fn test_second_run_is_a_no_op() {
        let (repo, _dir) = temp_repo().await;
        let repo = Arc::new(repo);
        let gw = Arc::new(FakeGateway::new().script("-2", vec![Err(denied("-2"))]));
        let post = repo.create(&due_post(&["-1", "-2"]), Utc::now()).await.unwrap();
        let d = dispatcher(Arc::clone(&gw), Arc::clone(&repo));

        d.run_once(Utc::now()).await.unwrap();
        let first = repo.get(&post.id).await.unwrap();
        let again = d.run_once(Utc::now()).await.unwrap();
        assert!(again.is_empty());

        let second = repo.get(&post.id).await.unwrap();
        assert_eq!(second.status, first.status);
        assert_eq!(second.attempts, first.attempts);
        assert_eq!(gw.total_sends(), 2);
    }

    #[tokio::test]
    async fn test_future_and_cancelled_posts_are_not_sent() {
        let (repo, _dir) = temp_repo().await;
        let repo = Arc::new(repo);
        let gw = Arc::new(FakeGateway::new());
        let mut later = due_post(&["-1"]);
        later.scheduled_at = Utc::now() + chrono::Duration::hours(1);
        let future = repo.create(&later, Utc::now()).await.unwrap();
        let cancelled = repo.create(&due_post(&["-2"]), Utc::now()).await.unwrap();
        repo.cancel(&cancelled.id, Utc::now()).await.unwrap();

        let report = dispatcher(Arc::clone(&gw), Arc::clone(&repo))
            .run_once(Utc::now())
            .await
            .unwrap();
        assert!(report.is_empty());
        assert_eq!(gw.total_sends(), 0);
        assert_eq!(repo.get(&future.id).await.unwrap().status, PostStatus::Pending);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_on_the_next_run_only_for_that_target() {
        let (repo, _dir) = temp_repo().await;
        let repo = Arc::new(repo);
        let gw = Arc::new(FakeGateway::new().script("-2", vec![Err(flaky("-2"))]));
        let post = repo.create(&due_post(&["-1", "-2"]), Utc::now()).await.unwrap();
        let d = dispatcher(Arc::clone(&gw), Arc::clone(&repo));

        let first = d.run_once(Utc::now()).await.unwrap();
        assert_eq!(first.posts[0].status, PostStatus::Pending);
        assert_eq!(first.posts[0].retrying, 1);
        let pending = repo.get(&post.id).await.unwrap();
        assert_eq!(pending.status, PostStatus::Pending);
        assert_eq!(pending.attempts.len(), 2);

        // Script exhausted: the retry succeeds.
        let second = d.run_once(Utc::now()).await.unwrap();
        assert_eq!(second.posts[0].status, PostStatus::Sent);
        assert_eq!(gw.sends_to("-1"), 1);
        assert_eq!(gw.sends_to("-2"), 2);

        let done = repo.get(&post.id).await.unwrap();
        assert_eq!(done.attempts.len(), 2);
        assert_eq!(done.attempts[1].tries, 2);
        assert_eq!(done.attempts[1].outcome, AttemptOutcome::Success);
    }

    #[tokio::test]
    async fn test_transient_failure_becomes_final_after_max_tries() {
        let (repo, _dir) = temp_repo().await;
        let repo = Arc::new(repo);
        let gw = Arc::new(FakeGateway::new().script(
            "-1",
            vec![Err(flaky("-1")), Err(flaky("-1")), Err(flaky("-1"))],
        ));
        let post = repo.create(&due_post(&["-1"]), Utc::now()).await.unwrap();
        let settings = DispatcherSettings {
            max_tries: 2,
            ..Default::default()
        };
        let d = Dispatcher::new(gw.clone(), repo.clone(), settings);

        d.run_once(Utc::now()).await.unwrap();
        let report = d.run_once(Utc::now()).await.unwrap();
        assert_eq!(report.posts[0].status, PostStatus::Failed);
        assert!(d.run_once(Utc::now()).await.unwrap().is_empty());
        assert_eq!(gw.sends_to("-1"), 2);
        assert_eq!(repo.get(&post.id).await.unwrap().attempts[0].tries, 2);
    }

    #[tokio::test]
    async fn test_crash_before_finalize_does_not_resend_delivered_targets() {
        let (repo, _dir) = temp_repo().await;
        let repo = Arc::new(repo);
        let post = repo.create(&due_post(&["-1", "-2"]), Utc::now()).await.unwrap();

        // A previous dispatcher delivered to -1, then died holding an expired lease.
        assert!(repo
            .claim(&post.id, "dispatcher-dead", minutes_ago(30), minutes_ago(20))
            .await
            .unwrap());
        let delivered = DeliveryAttempt::from_result(ChatRef::Id(-1), &Ok(()), minutes_ago(25));
        repo.record_attempt(&post.id, &delivered).await.unwrap();

        let gw = Arc::new(FakeGateway::new());
        let report = dispatcher(Arc::clone(&gw), Arc::clone(&repo))
            .run_once(Utc::now())
            .await
            .unwrap();
        assert_eq!(report.posts[0].status, PostStatus::Sent);
        assert_eq!(gw.sends_to("-1"), 0);
        assert_eq!(gw.sends_to("-2"), 1);
        assert_eq!(repo.get(&post.id).await.unwrap().attempts.len(), 2);
    }

    #[tokio::test]
    async fn test_post_under_live_lease_is_skipped() {
        let (repo, _dir) = temp_repo().await;
        let repo = Arc::new(repo);
        let post = repo.create(&due_post(&["-1"]), Utc::now()).await.unwrap();
        repo.claim(
            &post.id,
            "dispatcher-other",
            Utc::now(),
            Utc::now() + chrono::Duration::minutes(5),
        )
        .await
        .unwrap();

        let gw = Arc::new(FakeGateway::new());
        let report = dispatcher(Arc::clone(&gw), Arc::clone(&repo))
            .run_once(Utc::now())
            .await
            .unwrap();
        assert_eq!(report.skipped, 1);
        assert!(report.posts.is_empty());
        assert_eq!(gw.total_sends(), 0);
    }

    #[tokio::test]
    async fn test_overlapping_runs_send_each_target_once() {
        let (repo, _dir) = temp_repo().await;
        let repo = Arc::new(repo);
        let gw = Arc::new(FakeGateway::new().with_send_delay(Duration::from_millis(50)));
        repo.create(&due_post(&["-1", "-2"]), Utc::now()).await.unwrap();
        let d = dispatcher(Arc::clone(&gw), Arc::clone(&repo));

        let (a, b) = tokio::join!(d.run_once(Utc::now()), d.run_once(Utc::now()));
        let processed = a.unwrap().posts.len() + b.unwrap().posts.len();
        assert_eq!(processed, 1);
        assert_eq!(gw.sends_to("-1"), 1);
        assert_eq!(gw.sends_to("-2"), 1);
    }

    #[tokio::test]
    async fn test_slow_send_times_out_as_retryable_failure() {
        let (repo, _dir) = temp_repo().await;
        let repo = Arc::new(repo);
        let gw = Arc::new(FakeGateway::new().with_send_delay(Duration::from_millis(200)));
        let post = repo.create(&due_post(&["-1"]), Utc::now()).await.unwrap();
        let settings = DispatcherSettings {
            send_timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let report = Dispatcher::new(gw, repo.clone(), settings)
            .run_once(Utc::now())
            .await
            .unwrap();
        assert_eq!(report.posts[0].retrying, 1);
        let stored = repo.get(&post.id).await.unwrap();
        assert!(stored.attempts[0].retryable);
        assert!(stored.attempts[0].error.as_deref().unwrap().contains("timeout"));
    }

    /// Lets another dispatcher run a full pass on the post after `list_due`
    /// but before our first claim.
    struct InterleavedStore {
        inner: Arc<SqliteRepo>,
        interleaved: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl PostStore for InterleavedStore {
        async fn create(&self, post: &NewPost, now: DateTime<Utc>) -> Result<ScheduledPost, DomainError> {
            self.inner.create(post, now).await
        }

        async fn get(&self, post_id: &str) -> Result<ScheduledPost, DomainError> {
            self.inner.get(post_id).await
        }

        async fn list_recent(&self, limit: u32) -> Result<Vec<ScheduledPost>, DomainError> {
            self.inner.list_recent(limit).await
        }

        async fn list_due(&self, as_of: DateTime<Utc>) -> Result<Vec<ScheduledPost>, DomainError> {
            self.inner.list_due(as_of).await
        }

        async fn claim(
            &self,
            post_id: &str,
            owner: &str,
            now: DateTime<Utc>,
            lease_until: DateTime<Utc>,
        ) -> Result<bool, DomainError> {
            use std::sync::atomic::Ordering;
            if !self.interleaved.swap(true, Ordering::SeqCst) {
                let other = "dispatcher-other";
                assert!(self.inner.claim(post_id, other, now, lease_until).await?);
                let ok = DeliveryAttempt::from_result(ChatRef::Id(-1), &Ok(()), now);
                self.inner.record_attempt(post_id, &ok).await?;
                let retry = DeliveryAttempt::from_result(ChatRef::Id(-2), &Err(flaky("-2")), now);
                self.inner.record_attempt(post_id, &retry).await?;
                self.inner
                    .finalize_status(post_id, other, PostStatus::Pending, now)
                    .await?;
            }
            self.inner.claim(post_id, owner, now, lease_until).await
        }

        async fn record_attempt(
            &self,
            post_id: &str,
            attempt: &DeliveryAttempt,
        ) -> Result<DeliveryAttempt, DomainError> {
            self.inner.record_attempt(post_id, attempt).await
        }

        async fn finalize_status(
            &self,
            post_id: &str,
            owner: &str,
            status: PostStatus,
            processed_at: DateTime<Utc>,
        ) -> Result<(), DomainError> {
            self.inner
                .finalize_status(post_id, owner, status, processed_at)
                .await
        }

        async fn cancel(&self, post_id: &str, now: DateTime<Utc>) -> Result<(), DomainError> {
            self.inner.cancel(post_id, now).await
        }

        async fn delivery_stats(&self) -> Result<Vec<DeliveryStats>, DomainError> {
            self.inner.delivery_stats().await
        }
    }

    #[tokio::test]
    async fn test_attempts_recorded_before_claim_are_not_resent() {
        let (repo, _dir) = temp_repo().await;
        let repo = Arc::new(repo);
        let post = repo.create(&due_post(&["-1", "-2"]), Utc::now()).await.unwrap();
        let store = Arc::new(InterleavedStore {
            inner: Arc::clone(&repo),
            interleaved: std::sync::atomic::AtomicBool::new(false),
        });
        let gw = Arc::new(FakeGateway::new());

        let report = Dispatcher::new(gw.clone(), store, DispatcherSettings::default())
            .run_once(Utc::now())
            .await
            .unwrap();
        assert_eq!(report.posts[0].status, PostStatus::Sent);
        assert_eq!(gw.sends_to("-1"), 0);
        assert_eq!(gw.sends_to("-2"), 1);

        let stored = repo.get(&post.id).await.unwrap();
        assert_eq!(stored.attempts[0].tries, 1);
        assert_eq!(stored.attempts[1].tries, 2);
        assert_eq!(stored.attempts[1].outcome, AttemptOutcome::Success);
    }

    #[test]
    fn test_effective_lease_outlasts_send_timeout() {
        let short = DispatcherSettings {
            lease: Duration::from_millis(20),
            send_timeout: Duration::from_secs(1),
            ..Default::default()
        };
        assert_eq!(short.effective_lease(), Duration::from_secs(2));
        assert_eq!(
            DispatcherSettings::default().effective_lease(),
            Duration::from_secs(300)
        );
    }

    #[tokio::test]
    async fn test_cancel_is_refused_while_sends_are_in_flight() {
        let (repo, _dir) = temp_repo().await;
        let repo = Arc::new(repo);
        let gw = Arc::new(FakeGateway::new().with_send_delay(Duration::from_millis(200)));
        let post = repo.create(&due_post(&["-1"]), Utc::now()).await.unwrap();
        let settings = DispatcherSettings {
            lease: Duration::from_millis(20),
            send_timeout: Duration::from_secs(1),
            ..Default::default()
        };
        let d = Arc::new(Dispatcher::new(gw.clone(), repo.clone(), settings));

        let run = tokio::spawn({
            let d = Arc::clone(&d);
            async move { d.run_once(Utc::now()).await }
        });
        tokio::time::sleep(Duration::from_millis(80)).await;
        let cancel = repo.cancel(&post.id, Utc::now()).await;
        assert!(matches!(cancel, Err(DomainError::InvalidTransition { .. })));

        let report = run.await.unwrap().unwrap();
        assert!(report.errors.is_empty());
        assert_eq!(report.posts[0].status, PostStatus::Sent);
        let stored = repo.get(&post.id).await.unwrap();
        assert_eq!(stored.status, PostStatus::Sent);
        assert_eq!(stored.attempts.len(), 1);
    }

    #[tokio::test]
    async fn test_lease_is_renewed_across_send_batches() {
        let (repo, _dir) = temp_repo().await;
        let repo = Arc::new(repo);
        let gw = Arc::new(FakeGateway::new().with_send_delay(Duration::from_millis(80)));
        let post = repo
            .create(&due_post(&["-1", "-2", "-3", "-4"]), Utc::now())
            .await
            .unwrap();
        // One send at a time; the whole post takes longer than one lease.
        let settings = DispatcherSettings {
            concurrency: 1,
            lease: Duration::from_millis(10),
            send_timeout: Duration::from_millis(120),
            ..Default::default()
        };
        let d = Arc::new(Dispatcher::new(gw.clone(), repo.clone(), settings));

        let run = tokio::spawn({
            let d = Arc::clone(&d);
            async move { d.run_once(Utc::now()).await }
        });
        // Past the initial 240ms lease, while the fourth send is in flight.
        tokio::time::sleep(Duration::from_millis(300)).await;
        let stolen = repo
            .claim(
                &post.id,
                "dispatcher-other",
                Utc::now(),
                Utc::now() + chrono::Duration::minutes(5),
            )
            .await
            .unwrap();
        assert!(!stolen);

        let report = run.await.unwrap().unwrap();
        assert_eq!(report.posts[0].status, PostStatus::Sent);
        assert_eq!(gw.total_sends(), 4);
    }

    #[tokio::test]
    async fn test_takeover_mid_post_stops_remaining_sends() {
        let (repo, _dir) = temp_repo().await;
        let repo = Arc::new(repo);
        let gw = Arc::new(FakeGateway::new().with_send_delay(Duration::from_millis(50)));
        let post = repo
            .create(&due_post(&["-1", "-2", "-3"]), Utc::now())
            .await
            .unwrap();
        let settings = DispatcherSettings {
            concurrency: 1,
            ..Default::default()
        };
        let d = Arc::new(Dispatcher::new(gw.clone(), repo.clone(), settings));

        let run = tokio::spawn({
            let d = Arc::clone(&d);
            async move { d.run_once(Utc::now()).await }
        });
        // Simulate a lease that ran out: another dispatcher holds the post now.
        tokio::time::sleep(Duration::from_millis(20)).await;
        repo.finalize_status(&post.id, d.owner(), PostStatus::Pending, Utc::now())
            .await
            .unwrap();
        assert!(repo
            .claim(
                &post.id,
                "dispatcher-other",
                Utc::now(),
                Utc::now() + chrono::Duration::minutes(5),
            )
            .await
            .unwrap());

        let report = run.await.unwrap().unwrap();
        assert!(report.posts.is_empty());
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].1.contains("no longer claimed"));
        assert_eq!(gw.total_sends(), 1);

        let stored = repo.get(&post.id).await.unwrap();
        assert_eq!(stored.status, PostStatus::Pending);
        assert_eq!(stored.attempts.len(), 1);
    }

    #[tokio::test]
    async fn test_panicked_send_counts_as_transient_failure() {
        let (repo, _dir) = temp_repo().await;
        let repo = Arc::new(repo);
        let gw = Arc::new(FakeGateway::new().with_panic_on("-2"));
        let post = repo.create(&due_post(&["-1", "-2"]), Utc::now()).await.unwrap();
        let settings = DispatcherSettings {
            max_tries: 2,
            ..Default::default()
        };
        let d = Dispatcher::new(gw.clone(), repo.clone(), settings);

        let first = d.run_once(Utc::now()).await.unwrap();
        assert_eq!(first.posts[0].status, PostStatus::Pending);
        assert_eq!(first.posts[0].retrying, 1);
        let stored = repo.get(&post.id).await.unwrap();
        assert_eq!(stored.attempts[1].target, ChatRef::Id(-2));
        assert!(stored.attempts[1].retryable);
        assert!(stored.attempts[1]
            .error
            .as_deref()
            .unwrap()
            .contains("send task panicked"));

        let second = d.run_once(Utc::now()).await.unwrap();
        assert_eq!(second.posts[0].status, PostStatus::PartiallySent);
        assert!(d.run_once(Utc::now()).await.unwrap().is_empty());
        assert_eq!(repo.get(&post.id).await.unwrap().attempts[1].tries, 2);
    }
}
