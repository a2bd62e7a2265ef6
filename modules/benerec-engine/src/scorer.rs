//! Hybrid scoring: cold-start heuristics blended with collaborative signals.
//!
//! Every score lands in [0, 1]. Missing data is neutral, not a penalty:
//! when an item is unknown, the catalog is empty, or collaborative evidence
//! is absent, the affected score is exactly 0.5 so a user is never starved
//! of recommendations by a data gap. Neutral fallbacks carry a reason code
//! and are logged at this boundary.

use tracing::debug;

use benerec_common::{ItemId, ItemStatus, RankedItem, UserId, UserProfile};

use crate::snapshot::EngineSnapshot;

/// Score used when a data source is empty or the subject is unknown.
pub const NEUTRAL_SCORE: f64 = 0.5;

/// Cold-start heuristic weights: community match, popularity, activity.
const COMMUNITY_WEIGHT: f64 = 0.5;
const POPULARITY_WEIGHT: f64 = 0.3;
const ACTIVITY_WEIGHT: f64 = 0.2;

/// Final blend between the heuristic and collaborative scores.
const COLD_START_BLEND: f64 = 0.6;
const COLLABORATIVE_BLEND: f64 = 0.4;

/// How many most-similar other users feed the collaborative score.
const SIMILAR_USER_COUNT: usize = 5;

enum ScoreOutcome {
    Value(f64),
    Neutral(&'static str),
}

/// True iff the user has no profile or zero recorded interactions.
pub fn is_cold_start(snapshot: &EngineSnapshot, user_id: &UserId) -> bool {
    match snapshot.profiles.get(user_id) {
        Some(profile) => profile.total_interactions == 0,
        None => true,
    }
}

/// Heuristic score in [0, 1]: community match (50%), popularity (30%),
/// user activity (20%).
pub fn cold_start_score(snapshot: &EngineSnapshot, user_id: &UserId, item_id: &ItemId) -> f64 {
    match heuristic_outcome(snapshot, user_id, item_id) {
        ScoreOutcome::Value(v) => v,
        ScoreOutcome::Neutral(reason) => {
            debug!(user_id = %user_id, item_id = %item_id, reason, "Neutral heuristic score");
            NEUTRAL_SCORE
        }
    }
}

fn heuristic_outcome(
    snapshot: &EngineSnapshot,
    user_id: &UserId,
    item_id: &ItemId,
) -> ScoreOutcome {
    if snapshot.items.is_empty() {
        return ScoreOutcome::Neutral("no item catalog loaded");
    }
    let Some(item) = snapshot.items.get(item_id) else {
        return ScoreOutcome::Neutral("item not in catalog");
    };

    let fallback = UserProfile::empty(user_id.clone());
    let profile = snapshot.profiles.get(user_id).unwrap_or(&fallback);

    // Absence of a community signal is neutral (0.5), not a penalty.
    let community_match = if !item.community_id.is_empty()
        && profile.top_communities.contains(&item.community_id)
    {
        1.0
    } else {
        0.5
    };

    let popularity = (item.popularity_score / 100.0).min(1.0);
    let activity = ((profile.num_posts + profile.num_comments) as f64 / 100.0).min(1.0);

    let score = COMMUNITY_WEIGHT * community_match
        + POPULARITY_WEIGHT * popularity
        + ACTIVITY_WEIGHT * activity;

    ScoreOutcome::Value(score.clamp(0.0, 1.0))
}

/// Collaborative score in [0, 1]: the average vote of the user's most-similar
/// other users on this item, clipped to [0, 1]. Neutral 0.5 when similarity
/// data is absent, the user is unknown, or no similar user has voted on it.
pub fn collaborative_score(snapshot: &EngineSnapshot, user_id: &UserId, item_id: &ItemId) -> f64 {
    match collaborative_outcome(snapshot, user_id, item_id) {
        ScoreOutcome::Value(v) => v,
        ScoreOutcome::Neutral(reason) => {
            debug!(user_id = %user_id, item_id = %item_id, reason, "Neutral collaborative score");
            NEUTRAL_SCORE
        }
    }
}

fn collaborative_outcome(
    snapshot: &EngineSnapshot,
    user_id: &UserId,
    item_id: &ItemId,
) -> ScoreOutcome {
    let Some(matrix) = &snapshot.interactions else {
        return ScoreOutcome::Neutral("no interaction data");
    };
    if !matrix.contains(user_id) {
        return ScoreOutcome::Neutral("user not in interaction matrix");
    }

    let votes: Vec<f64> = matrix
        .top_similar(user_id, SIMILAR_USER_COUNT)
        .into_iter()
        .filter_map(|(other, _)| matrix.vote(other, item_id))
        .filter(|v| *v != 0.0)
        .collect();

    if votes.is_empty() {
        return ScoreOutcome::Neutral("no similar-user votes on item");
    }

    let mean = votes.iter().sum::<f64>() / votes.len() as f64;
    ScoreOutcome::Value(mean.clamp(0.0, 1.0))
}

/// Score each active candidate with the 0.6/0.4 blend, sort descending
/// (stable, so equal scores keep the candidate enumeration order), truncate
/// to `top_k`, and assign 1-based contiguous ranks.
pub fn rank_candidates<'a>(
    snapshot: &EngineSnapshot,
    user_id: &UserId,
    candidates: impl Iterator<Item = &'a ItemId>,
    top_k: usize,
) -> Vec<RankedItem> {
    let mut scored: Vec<(ItemId, f64)> = candidates
        .filter(|item_id| {
            snapshot
                .items
                .get(*item_id)
                .map(|item| item.status == ItemStatus::Active)
                .unwrap_or(false)
        })
        .map(|item_id| {
            let cold = cold_start_score(snapshot, user_id, item_id);
            let collab = collaborative_score(snapshot, user_id, item_id);
            let final_score = COLD_START_BLEND * cold + COLLABORATIVE_BLEND * collab;
            (item_id.clone(), final_score)
        })
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    scored
        .into_iter()
        .take(top_k)
        .enumerate()
        .map(|(i, (item_id, score))| RankedItem {
            item_id,
            score,
            rank: i as u32 + 1,
        })
        .collect()
}

/// Cold-start path: score the entire active catalog exhaustively. A brand-new
/// user has no embedding-similarity anchor, so no ANN search is involved.
pub fn cold_start_recommendations(
    snapshot: &EngineSnapshot,
    user_id: &UserId,
    top_k: usize,
) -> Vec<RankedItem> {
    rank_candidates(snapshot, user_id, snapshot.active_items(), top_k)
}
