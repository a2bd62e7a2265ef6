//! Immutable per-process snapshot of user profiles, the item catalog, and
//! collaborative-filtering state, with an atomic swap store for rebuilds.
//!
//! A rebuild produces an entirely new snapshot and swaps the active pointer;
//! readers in flight keep the old snapshot until they complete. Nothing here
//! is mutated in place after construction.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use benerec_common::{
    ItemId, ItemRecord, ItemStatus, PostDoc, UserDoc, UserId, UserProfile, VoteDoc,
};
use benerec_store::DocumentStore;

/// Sparse user×item vote matrix plus the derived user×user cosine-similarity
/// matrix. Rebuilt as a unit; never partially updated.
pub struct InteractionMatrix {
    /// Ascending user id order, the deterministic tie-break for similarity.
    users: Vec<UserId>,
    user_index: HashMap<UserId, usize>,
    /// Per-user item → aggregated vote value. Last write wins during
    /// flattening of the nested source documents.
    votes: Vec<HashMap<ItemId, f64>>,
    /// Square cosine-similarity matrix aligned with `users`.
    similarity: Vec<Vec<f64>>,
}

impl InteractionMatrix {
    /// Flatten nested vote documents into the matrix and derive similarity.
    /// Returns `None` when no post votes exist at all.
    fn build(vote_docs: &[VoteDoc]) -> Option<Self> {
        let mut per_user: HashMap<UserId, HashMap<ItemId, f64>> = HashMap::new();

        for doc in vote_docs {
            let Some(block) = &doc.post else {
                continue;
            };
            let entry = per_user.entry(doc.user_id.clone()).or_default();
            for target in &block.target_ids {
                entry.insert(target.clone(), block.value as f64);
            }
        }

        per_user.retain(|_, items| !items.is_empty());
        if per_user.is_empty() {
            return None;
        }

        let mut users: Vec<UserId> = per_user.keys().cloned().collect();
        users.sort();

        let user_index: HashMap<UserId, usize> = users
            .iter()
            .enumerate()
            .map(|(i, u)| (u.clone(), i))
            .collect();

        let votes: Vec<HashMap<ItemId, f64>> = users
            .iter()
            .map(|u| per_user.remove(u).unwrap_or_default())
            .collect();

        let n = users.len();
        let mut similarity = vec![vec![0.0; n]; n];
        for i in 0..n {
            similarity[i][i] = 1.0;
            for j in (i + 1)..n {
                let sim = sparse_cosine(&votes[i], &votes[j]);
                similarity[i][j] = sim;
                similarity[j][i] = sim;
            }
        }

        Some(Self {
            users,
            user_index,
            votes,
            similarity,
        })
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn contains(&self, user_id: &UserId) -> bool {
        self.user_index.contains_key(user_id)
    }

    /// The `k` most-similar *other* users, most similar first. Ties are
    /// broken by ascending user id (the order of `users`), so the result is
    /// deterministic for equal similarities.
    pub fn top_similar(&self, user_id: &UserId, k: usize) -> Vec<(&UserId, f64)> {
        let Some(&idx) = self.user_index.get(user_id) else {
            return Vec::new();
        };

        let mut others: Vec<(usize, f64)> = (0..self.users.len())
            .filter(|&j| j != idx)
            .map(|j| (j, self.similarity[idx][j]))
            .collect();

        // Stable sort: equal similarities keep ascending-user-id order.
        others.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        others
            .into_iter()
            .take(k)
            .map(|(j, sim)| (&self.users[j], sim))
            .collect()
    }

    /// The recorded vote of `user_id` on `item_id`, if any.
    pub fn vote(&self, user_id: &UserId, item_id: &ItemId) -> Option<f64> {
        let &idx = self.user_index.get(user_id)?;
        self.votes[idx].get(item_id).copied()
    }
}

fn sparse_cosine(a: &HashMap<ItemId, f64>, b: &HashMap<ItemId, f64>) -> f64 {
    // Iterate the smaller map against the larger one.
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };

    let dot: f64 = small
        .iter()
        .filter_map(|(item, v)| large.get(item).map(|w| v * w))
        .sum();
    let norm_a: f64 = a.values().map(|v| v * v).sum::<f64>().sqrt();
    let norm_b: f64 = b.values().map(|v| v * v).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Read-only snapshot shared by all concurrent requests.
pub struct EngineSnapshot {
    pub profiles: HashMap<UserId, UserProfile>,
    pub items: HashMap<ItemId, ItemRecord>,
    /// Catalog enumeration order, the stable tie-break for ranking.
    pub item_order: Vec<ItemId>,
    /// Absent when no post votes exist; collaborative scoring then returns
    /// its neutral default.
    pub interactions: Option<InteractionMatrix>,
    pub built_at: DateTime<Utc>,
}

impl EngineSnapshot {
    /// Pure rebuild from raw collections. Never fails: empty inputs yield
    /// empty maps, malformed rows were already skipped at the store layer.
    pub fn build(users: &[UserDoc], posts: &[PostDoc], votes: &[VoteDoc]) -> Self {
        let mut profiles = HashMap::with_capacity(users.len());
        for user in users {
            profiles.insert(
                user.user_id.clone(),
                UserProfile {
                    user_id: user.user_id.clone(),
                    total_interactions: user.num_posts + user.num_comments,
                    top_communities: user.communities_followed.iter().cloned().collect(),
                    num_posts: user.num_posts,
                    num_comments: user.num_comments,
                },
            );
        }

        let mut items = HashMap::with_capacity(posts.len());
        let mut item_order = Vec::with_capacity(posts.len());
        for post in posts {
            let record = ItemRecord {
                item_id: post.post_id.clone(),
                community_id: post.community_id.clone(),
                popularity_score: post.score,
                status: parse_status(&post.status),
            };
            if items.insert(post.post_id.clone(), record).is_none() {
                item_order.push(post.post_id.clone());
            }
        }

        let interactions = InteractionMatrix::build(votes);
        match &interactions {
            Some(matrix) => info!(
                users = profiles.len(),
                items = items.len(),
                matrix_users = matrix.user_count(),
                "Engine snapshot built"
            ),
            None => info!(
                users = profiles.len(),
                items = items.len(),
                "Engine snapshot built without vote data; collaborative scoring disabled"
            ),
        }

        Self {
            profiles,
            items,
            item_order,
            interactions,
            built_at: Utc::now(),
        }
    }

    pub fn empty() -> Self {
        Self {
            profiles: HashMap::new(),
            items: HashMap::new(),
            item_order: Vec::new(),
            interactions: None,
            built_at: Utc::now(),
        }
    }

    /// Active catalog items in enumeration order: the cold-start candidate set.
    pub fn active_items(&self) -> impl Iterator<Item = &ItemId> {
        self.item_order.iter().filter(|id| {
            self.items
                .get(*id)
                .map(|item| item.status == ItemStatus::Active)
                .unwrap_or(false)
        })
    }
}

fn parse_status(raw: &str) -> ItemStatus {
    match raw {
        "active" => ItemStatus::Active,
        "removed" => ItemStatus::Removed,
        _ => ItemStatus::Inactive,
    }
}

/// Thread-safe wrapper around `EngineSnapshot` with atomic swap for lock-free
/// reads. Only one rebuild runs at a time; a failed rebuild keeps stale data.
pub struct SnapshotStore {
    inner: ArcSwap<EngineSnapshot>,
    reloading: AtomicBool,
}

impl SnapshotStore {
    pub fn new(initial: EngineSnapshot) -> Self {
        Self {
            inner: ArcSwap::new(Arc::new(initial)),
            reloading: AtomicBool::new(false),
        }
    }

    /// Get the current snapshot. Returns an owned `Arc` so callers keep a
    /// consistent view even if a rebuild swaps in new data mid-request.
    pub fn current(&self) -> Arc<EngineSnapshot> {
        self.inner.load_full()
    }

    /// Rebuild from the document store and swap atomically.
    pub async fn rebuild(&self, docs: &dyn DocumentStore) {
        if self
            .reloading
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("Snapshot rebuild already in progress, skipping");
            return;
        }

        match load_snapshot(docs).await {
            Ok(snapshot) => {
                self.inner.store(Arc::new(snapshot));
                info!("Engine snapshot swapped in");
            }
            Err(e) => {
                error!(error = %e, "Snapshot rebuild failed, keeping stale data");
            }
        }

        self.reloading.store(false, Ordering::SeqCst);
    }

    /// Spawn a background loop that rebuilds the snapshot on a timer.
    pub fn spawn_reload_loop(
        self: &Arc<Self>,
        docs: Arc<dyn DocumentStore>,
        interval_hours: u64,
    ) {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let interval = std::time::Duration::from_secs(interval_hours * 3600);
            loop {
                tokio::time::sleep(interval).await;
                store.rebuild(docs.as_ref()).await;
            }
        });

        info!(interval_hours, "Snapshot reload loop started");
    }
}

async fn load_snapshot(docs: &dyn DocumentStore) -> anyhow::Result<EngineSnapshot> {
    let (users, posts) = tokio::try_join!(docs.get_users(), docs.get_posts())?;

    // Vote data is optional: a failed fetch disables collaborative scoring
    // for this snapshot instead of keeping the whole snapshot stale.
    let votes = match docs.get_votes().await {
        Ok(votes) => votes,
        Err(e) => {
            warn!(error = %e, "Vote fetch failed; building snapshot without collaborative data");
            Vec::new()
        }
    };

    Ok(EngineSnapshot::build(&users, &posts, &votes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{post_doc, user_doc, vote_doc};

    #[test]
    fn build_on_empty_inputs_yields_empty_snapshot() {
        let snapshot = EngineSnapshot::build(&[], &[], &[]);
        assert!(snapshot.profiles.is_empty());
        assert!(snapshot.items.is_empty());
        assert!(snapshot.interactions.is_none());
    }

    #[test]
    fn profile_totals_sum_posts_and_comments() {
        let users = vec![user_doc("u1").posts(3).comments(4).build()];
        let snapshot = EngineSnapshot::build(&users, &[], &[]);

        let profile = &snapshot.profiles[&"u1".into()];
        assert_eq!(profile.total_interactions, 7);
        assert_eq!(profile.num_posts, 3);
        assert_eq!(profile.num_comments, 4);
    }

    #[test]
    fn empty_votes_disable_collaborative_data() {
        let users = vec![user_doc("u1").build()];
        let posts = vec![post_doc("p1").build()];
        let snapshot = EngineSnapshot::build(&users, &posts, &[]);
        assert!(snapshot.interactions.is_none());
    }

    #[test]
    fn vote_flattening_is_last_write_wins() {
        let votes = vec![
            vote_doc("u1", &["p1", "p2"], 1),
            vote_doc("u1", &["p2"], -1),
        ];
        let snapshot = EngineSnapshot::build(&[], &[], &votes);

        let matrix = snapshot.interactions.as_ref().unwrap();
        assert_eq!(matrix.vote(&"u1".into(), &"p1".into()), Some(1.0));
        assert_eq!(matrix.vote(&"u1".into(), &"p2".into()), Some(-1.0));
    }

    #[test]
    fn similarity_ranks_identical_voters_first() {
        // u1 and u2 vote identically; u3 votes on disjoint items.
        let votes = vec![
            vote_doc("u1", &["p1", "p2"], 1),
            vote_doc("u2", &["p1", "p2"], 1),
            vote_doc("u3", &["p9"], 1),
        ];
        let snapshot = EngineSnapshot::build(&[], &[], &votes);
        let matrix = snapshot.interactions.as_ref().unwrap();

        let similar = matrix.top_similar(&"u1".into(), 2);
        assert_eq!(similar[0].0, &UserId::from("u2"));
        assert!((similar[0].1 - 1.0).abs() < 1e-9);
        assert!(similar[1].1.abs() < 1e-9);
    }

    #[test]
    fn top_similar_excludes_self_and_breaks_ties_by_user_id() {
        // All three users vote identically — every pairwise similarity is 1.
        let votes = vec![
            vote_doc("u3", &["p1"], 1),
            vote_doc("u1", &["p1"], 1),
            vote_doc("u2", &["p1"], 1),
        ];
        let snapshot = EngineSnapshot::build(&[], &[], &votes);
        let matrix = snapshot.interactions.as_ref().unwrap();

        let similar = matrix.top_similar(&"u2".into(), 5);
        let ids: Vec<&str> = similar.iter().map(|(u, _)| u.as_str()).collect();
        assert_eq!(ids, vec!["u1", "u3"]);
    }

    #[test]
    fn active_items_keep_catalog_order_and_skip_inactive() {
        let posts = vec![
            post_doc("p1").build(),
            post_doc("p2").status("inactive").build(),
            post_doc("p3").build(),
        ];
        let snapshot = EngineSnapshot::build(&[], &posts, &[]);

        let active: Vec<&str> = snapshot.active_items().map(|id| id.as_str()).collect();
        assert_eq!(active, vec!["p1", "p3"]);
    }

    #[test]
    fn missing_popularity_defaults_to_zero() {
        let posts = vec![post_doc("p1").build()];
        let snapshot = EngineSnapshot::build(&[], &posts, &[]);
        assert_eq!(snapshot.items[&"p1".into()].popularity_score, 0.0);
    }
}
