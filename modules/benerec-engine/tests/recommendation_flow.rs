//! End-to-end flow over mocks: request resolution, async refresh, and the
//! nightly batch working against one shared cache and snapshot store.

use std::sync::Arc;
use std::time::Duration;

use benerec_common::{ItemId, UserId};
use benerec_store::DocumentStore;
use benerec_engine::testing::{
    post_doc, user_doc, vote_doc, FixedEmbedder, MockDocumentStore, TEST_EMBEDDING_DIM,
};
use benerec_engine::{
    jobs::{spawn_refresh_worker, RetryPolicy},
    EngineSnapshot, GenerationOrchestrator, RecommendationJobs, RefreshQueue, Resolution,
    SnapshotStore,
};
use benerec_index::VectorIndex;
use benerec_store::{MemoryCache, RecommendationCache};

const TOP_K: usize = 5;

fn catalog_index(item_count: usize) -> Arc<VectorIndex> {
    let mut index = VectorIndex::new();
    let vectors: Vec<Vec<f32>> = (0..item_count)
        .map(|i| {
            let mut v = vec![0.1; TEST_EMBEDDING_DIM];
            v[i % TEST_EMBEDDING_DIM] = 1.0;
            v
        })
        .collect();
    let ids = (0..item_count).map(|i| ItemId(format!("p{i}"))).collect();
    index.build(vectors, ids).unwrap();
    Arc::new(index)
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        backoff: Duration::from_millis(5),
        attempt_timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn warm_user_flow_generates_then_hits_cache() {
    let docs = MockDocumentStore::new()
        .with_user(user_doc("u3").username("grace").interests("compilers").posts(12).build())
        .with_post(post_doc("p0").build());

    let users = docs.get_users().await.unwrap();
    let posts = docs.get_posts().await.unwrap();
    let snapshot = EngineSnapshot::build(&users, &posts, &[]);

    let cache = Arc::new(MemoryCache::new(Duration::from_secs(60)));
    let snapshots = Arc::new(SnapshotStore::new(snapshot));
    let orchestrator = GenerationOrchestrator::new(snapshots, cache.clone(), TOP_K);

    let user: UserId = "u3".into();

    // Established user with no cache entry: the request defers to async work.
    assert_eq!(orchestrator.resolve(&user).await, Resolution::OnDemand);

    // The enqueued refresh populates the cache in the background.
    let jobs = Arc::new(RecommendationJobs::new(
        Arc::new(docs),
        cache.clone(),
        Arc::new(FixedEmbedder::new(TEST_EMBEDDING_DIM)),
        catalog_index(8),
        TOP_K,
    ));
    let (queue, rx) = RefreshQueue::new(4);
    let worker = spawn_refresh_worker(jobs, rx, fast_retry());
    queue.enqueue(&user).await.unwrap();
    drop(queue);
    worker.await.unwrap();

    // A repeated request is now a cache hit.
    let Resolution::CacheHit(list) = orchestrator.resolve(&user).await else {
        panic!("expected cache hit after background refresh");
    };
    assert_eq!(list.len(), TOP_K);
    assert_eq!(list[0].rank, 1);
}

#[tokio::test]
async fn cold_start_flow_is_synchronous_and_cached() {
    let docs = MockDocumentStore::new()
        .with_user(user_doc("u1").build())
        .with_post(post_doc("pa").score(10.0).build())
        .with_post(post_doc("pb").score(50.0).build())
        .with_post(post_doc("pc").score(90.0).build());

    let users = docs.get_users().await.unwrap();
    let posts = docs.get_posts().await.unwrap();
    let snapshot = EngineSnapshot::build(&users, &posts, &[]);

    let cache = Arc::new(MemoryCache::new(Duration::from_secs(60)));
    let orchestrator =
        GenerationOrchestrator::new(Arc::new(SnapshotStore::new(snapshot)), cache.clone(), TOP_K);

    let user: UserId = "u1".into();
    let Resolution::ColdStart(list) = orchestrator.resolve(&user).await else {
        panic!("expected synchronous cold-start computation");
    };

    // With no community overlap, ordering matches popularity.
    let ids: Vec<&str> = list.iter().map(|r| r.item_id.as_str()).collect();
    assert_eq!(ids, vec!["pc", "pb", "pa"]);

    // The result was written through the cache.
    assert_eq!(cache.get(&user).await.unwrap(), Some(list));
}

#[tokio::test]
async fn snapshot_rebuild_swaps_atomically_for_new_readers() {
    let store = Arc::new(SnapshotStore::new(EngineSnapshot::empty()));
    let before = store.current();
    assert!(before.profiles.is_empty());

    let docs = MockDocumentStore::new()
        .with_user(user_doc("u1").posts(2).build())
        .with_vote(vote_doc("u1", &["p1"], 1));
    store.rebuild(&docs).await;

    // The old Arc is untouched; the new snapshot has the rebuilt state.
    assert!(before.profiles.is_empty());
    let after = store.current();
    assert_eq!(after.profiles.len(), 1);
    assert!(after.interactions.is_some());
}

#[tokio::test]
async fn snapshot_rebuild_keeps_stale_data_on_store_failure() {
    let docs = MockDocumentStore::new().with_user(user_doc("u1").build());
    let store = Arc::new(SnapshotStore::new(EngineSnapshot::empty()));
    store.rebuild(&docs).await;
    assert_eq!(store.current().profiles.len(), 1);

    store.rebuild(&MockDocumentStore::new().failing()).await;
    assert_eq!(store.current().profiles.len(), 1, "stale snapshot must survive");
}

#[tokio::test]
async fn nightly_batch_fails_outright_only_when_user_list_is_unreachable() {
    let cache = Arc::new(MemoryCache::new(Duration::from_secs(60)));
    let jobs = RecommendationJobs::new(
        Arc::new(MockDocumentStore::new().failing()),
        cache,
        Arc::new(FixedEmbedder::new(TEST_EMBEDDING_DIM)),
        catalog_index(4),
        TOP_K,
    );

    assert!(jobs.regenerate_all().await.is_err());
}
