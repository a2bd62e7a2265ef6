//! Background generation: the nightly full-population batch and the
//! on-demand single-user refresh, plus the in-process refresh queue/worker.
//!
//! Both jobs run the vector path: embed the user's profile text, search the
//! index, and rank by `score = 1 / (1 + distance)`. This intentionally skips
//! the cold-start heuristic blend — the batch path trades scoring nuance for
//! bulk throughput. Per-user writes are independent; one user's failure
//! never aborts a batch.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use benerec_common::{RankedItem, UserDoc, UserId};
use benerec_index::{TextEmbedder, VectorIndex};
use benerec_store::{DocumentStore, RecommendationCache};

/// Aggregate result of a nightly batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchStats {
    pub successful: u32,
    pub failed: u32,
}

/// Result of a single-user refresh.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Success {
        user_id: UserId,
        recommendations: Vec<RankedItem>,
    },
    NotFound {
        user_id: UserId,
    },
    Failed {
        user_id: UserId,
        error: String,
    },
}

/// Bounded retry for background tasks. A task attempt that exceeds
/// `attempt_timeout` counts as failed and is retried like any other failure;
/// after `max_attempts` the task is reported as permanently failed.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(60),
            attempt_timeout: Duration::from_secs(30 * 60),
        }
    }
}

pub struct RecommendationJobs {
    docs: Arc<dyn DocumentStore>,
    cache: Arc<dyn RecommendationCache>,
    embedder: Arc<dyn TextEmbedder>,
    index: Arc<VectorIndex>,
    top_k: usize,
}

impl RecommendationJobs {
    pub fn new(
        docs: Arc<dyn DocumentStore>,
        cache: Arc<dyn RecommendationCache>,
        embedder: Arc<dyn TextEmbedder>,
        index: Arc<VectorIndex>,
        top_k: usize,
    ) -> Self {
        Self {
            docs,
            cache,
            embedder,
            index,
            top_k,
        }
    }

    /// Nightly batch: regenerate and cache recommendations for every known
    /// user, independent of current cache state. Per-user failures are
    /// counted, not propagated.
    pub async fn regenerate_all(&self) -> Result<BatchStats> {
        info!("Starting full-population recommendation generation");

        let users = self
            .docs
            .get_users()
            .await
            .context("fetching user list for batch generation")?;
        let total = users.len();

        let mut stats = BatchStats::default();
        for (idx, user) in users.iter().enumerate() {
            match self.generate_and_cache(user).await {
                Ok(_) => stats.successful += 1,
                Err(e) => {
                    warn!(user_id = %user.user_id, error = %e, "Batch generation failed for user");
                    stats.failed += 1;
                }
            }

            if (idx + 1) % 100 == 0 {
                info!(done = idx + 1, total, "Batch generation progress");
            }
        }

        info!(
            successful = stats.successful,
            failed = stats.failed,
            "Full-population generation complete"
        );
        Ok(stats)
    }

    /// On-demand refresh for one user. Never panics the worker: every
    /// failure mode is folded into the outcome.
    pub async fn refresh_single(&self, user_id: &UserId) -> RefreshOutcome {
        info!(user_id = %user_id, "Refreshing recommendations");

        let user = match self.docs.get_user(user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                warn!(user_id = %user_id, "No user found for refresh");
                return RefreshOutcome::NotFound {
                    user_id: user_id.clone(),
                };
            }
            Err(e) => {
                return RefreshOutcome::Failed {
                    user_id: user_id.clone(),
                    error: e.to_string(),
                };
            }
        };

        match self.generate_and_cache(&user).await {
            Ok(recommendations) => RefreshOutcome::Success {
                user_id: user_id.clone(),
                recommendations,
            },
            Err(e) => RefreshOutcome::Failed {
                user_id: user_id.clone(),
                error: e.to_string(),
            },
        }
    }

    async fn generate_and_cache(&self, user: &UserDoc) -> Result<Vec<RankedItem>> {
        let recommendations = self.vector_recommendations(user).await?;
        self.cache
            .put(&user.user_id, &recommendations)
            .await
            .context("caching recommendations")?;
        Ok(recommendations)
    }

    /// The vector path: profile text → embedding → k-NN → `1/(1+distance)`.
    /// A user with no profile text gets an empty list, not an error.
    async fn vector_recommendations(&self, user: &UserDoc) -> Result<Vec<RankedItem>> {
        let text = user.profile_text();
        if text.is_empty() {
            debug!(user_id = %user.user_id, "Empty profile text, returning no recommendations");
            return Ok(Vec::new());
        }

        let embedding = self
            .embedder
            .embed(&text)
            .await
            .context("embedding profile text")?;

        let hits = self.index.search(&embedding, self.top_k)?;

        Ok(hits
            .into_iter()
            .enumerate()
            .map(|(i, hit)| RankedItem {
                item_id: hit.item_id,
                score: 1.0 / (1.0 + hit.distance as f64),
                rank: i as u32 + 1,
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Refresh queue and worker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RefreshJob {
    pub task_id: Uuid,
    pub user_id: UserId,
}

/// Handle for enqueueing refresh jobs. Cloneable; the worker owns the
/// receiving end. Duplicate jobs for the same user are harmless: results
/// are idempotent and cache writes are last-write-wins.
#[derive(Clone)]
pub struct RefreshQueue {
    tx: mpsc::Sender<RefreshJob>,
}

impl RefreshQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<RefreshJob>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Enqueue a refresh for `user_id`, returning the task id.
    pub async fn enqueue(&self, user_id: &UserId) -> Result<Uuid> {
        let job = RefreshJob {
            task_id: Uuid::new_v4(),
            user_id: user_id.clone(),
        };
        let task_id = job.task_id;
        self.tx.send(job).await.map_err(|_| {
            benerec_common::EngineError::Task("refresh worker is not running".to_string())
        })?;
        debug!(user_id = %user_id, task_id = %task_id, "Refresh job enqueued");
        Ok(task_id)
    }
}

/// Spawn the worker that drains the refresh queue. Each job is retried per
/// `policy`; a permanently failed job is logged and surfaced as a failure
/// result, never a worker crash.
pub fn spawn_refresh_worker(
    jobs: Arc<RecommendationJobs>,
    mut rx: mpsc::Receiver<RefreshJob>,
    policy: RetryPolicy,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Refresh worker started");
        while let Some(job) = rx.recv().await {
            run_refresh_job(&jobs, &job, policy).await;
        }
        info!("Refresh queue closed, worker stopping");
    })
}

async fn run_refresh_job(jobs: &RecommendationJobs, job: &RefreshJob, policy: RetryPolicy) {
    for attempt in 1..=policy.max_attempts {
        let outcome = tokio::time::timeout(
            policy.attempt_timeout,
            jobs.refresh_single(&job.user_id),
        )
        .await;

        match outcome {
            Ok(RefreshOutcome::Success { recommendations, .. }) => {
                info!(
                    user_id = %job.user_id,
                    task_id = %job.task_id,
                    count = recommendations.len(),
                    "Refresh job complete"
                );
                return;
            }
            Ok(RefreshOutcome::NotFound { .. }) => {
                // A missing user will not appear by retrying.
                warn!(user_id = %job.user_id, task_id = %job.task_id, "Refresh target not found");
                return;
            }
            Ok(RefreshOutcome::Failed { error, .. }) => {
                warn!(
                    user_id = %job.user_id,
                    task_id = %job.task_id,
                    attempt,
                    error = %error,
                    "Refresh attempt failed"
                );
            }
            Err(_) => {
                warn!(
                    user_id = %job.user_id,
                    task_id = %job.task_id,
                    attempt,
                    timeout_secs = policy.attempt_timeout.as_secs(),
                    "Refresh attempt exceeded time budget"
                );
            }
        }

        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.backoff).await;
        }
    }

    error!(
        user_id = %job.user_id,
        task_id = %job.task_id,
        attempts = policy.max_attempts,
        "Refresh job permanently failed"
    );
}

/// Spawn the nightly regeneration loop. The batch itself retries per
/// `policy` before a run is abandoned until the next interval.
pub fn spawn_nightly_loop(
    jobs: Arc<RecommendationJobs>,
    interval_hours: u64,
    policy: RetryPolicy,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = Duration::from_secs(interval_hours * 3600);
        info!(interval_hours, "Nightly generation loop started");
        loop {
            tokio::time::sleep(interval).await;

            let mut done = false;
            for attempt in 1..=policy.max_attempts {
                match jobs.regenerate_all().await {
                    Ok(stats) => {
                        info!(
                            successful = stats.successful,
                            failed = stats.failed,
                            "Nightly generation run finished"
                        );
                        done = true;
                        break;
                    }
                    Err(e) => {
                        warn!(attempt, error = %e, "Nightly generation attempt failed");
                        if attempt < policy.max_attempts {
                            tokio::time::sleep(policy.backoff).await;
                        }
                    }
                }
            }
            if !done {
                error!(
                    attempts = policy.max_attempts,
                    "Nightly generation permanently failed for this interval"
                );
            }
        }
    })
}
