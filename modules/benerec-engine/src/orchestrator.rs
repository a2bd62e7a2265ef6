//! Per-request decision engine: cache, synchronous cold-start compute, or
//! asynchronous generation.
//!
//! State machine per request:
//! `START → {CACHE_HIT, CACHE_MISS} → {COLD_START, WARM_MISS}`.
//! Cache failures never reach the caller — a read error is a miss, a write
//! error is logged and dropped. Concurrent identical requests may both
//! compute and both write through; results are idempotent for a given
//! snapshot, so last-write-wins is accepted.

use std::sync::Arc;

use tracing::{info, warn};

use benerec_common::{RankedItem, UserId};
use benerec_store::RecommendationCache;

use crate::scorer;
use crate::snapshot::SnapshotStore;

/// Outcome of resolving a recommendation request.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Terminal: serve the cached list.
    CacheHit(Vec<RankedItem>),
    /// Terminal: computed synchronously and written through the cache.
    ColdStart(Vec<RankedItem>),
    /// Terminal for this request: the caller should enqueue asynchronous
    /// generation and answer "generating, retry".
    OnDemand,
}

pub struct GenerationOrchestrator {
    snapshots: Arc<SnapshotStore>,
    cache: Arc<dyn RecommendationCache>,
    top_k: usize,
}

impl GenerationOrchestrator {
    pub fn new(
        snapshots: Arc<SnapshotStore>,
        cache: Arc<dyn RecommendationCache>,
        top_k: usize,
    ) -> Self {
        Self {
            snapshots,
            cache,
            top_k,
        }
    }

    pub async fn resolve(&self, user_id: &UserId) -> Resolution {
        match self.cache.get(user_id).await {
            Ok(Some(cached)) => {
                return Resolution::CacheHit(cached);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Cache read failed, treating as miss");
            }
        }

        let snapshot = self.snapshots.current();

        if scorer::is_cold_start(&snapshot, user_id) {
            info!(user_id = %user_id, "Cold-start user, computing recommendations synchronously");
            let recommendations =
                scorer::cold_start_recommendations(&snapshot, user_id, self.top_k);

            if let Err(e) = self.cache.put(user_id, &recommendations).await {
                warn!(user_id = %user_id, error = %e, "Failed to cache cold-start recommendations");
            }
            return Resolution::ColdStart(recommendations);
        }

        info!(user_id = %user_id, "Cache miss for established user, deferring to async generation");
        Resolution::OnDemand
    }
}
