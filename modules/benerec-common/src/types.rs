use std::collections::HashSet;

use serde::{Deserialize, Serialize};

// --- Identifiers ---
//
// Users, items, and internal index offsets all live in different keyspaces.
// Opaque newtypes keep them from crossing collection boundaries unnoticed.

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ItemId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// --- Item catalog ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Active,
    Inactive,
    Removed,
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemStatus::Active => write!(f, "active"),
            ItemStatus::Inactive => write!(f, "inactive"),
            ItemStatus::Removed => write!(f, "removed"),
        }
    }
}

/// Catalog entry used by the cold-start heuristic. Missing popularity in the
/// source row defaults to 0.0; only `Active` items are scoring candidates.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemRecord {
    pub item_id: ItemId,
    pub community_id: String,
    pub popularity_score: f64,
    pub status: ItemStatus,
}

// --- User profile ---

/// Per-user activity profile, rebuilt wholesale on every snapshot pass.
/// Absence of a profile is treated identically to a zero-interaction profile.
#[derive(Debug, Clone, PartialEq)]
pub struct UserProfile {
    pub user_id: UserId,
    pub total_interactions: u32,
    pub top_communities: HashSet<String>,
    pub num_posts: u32,
    pub num_comments: u32,
}

impl UserProfile {
    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            total_interactions: 0,
            top_communities: HashSet::new(),
            num_posts: 0,
            num_comments: 0,
        }
    }
}

// --- Ranked output ---

/// One entry of a ranked recommendation list. `rank` is 1-based and strictly
/// increasing with decreasing `score`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedItem {
    pub item_id: ItemId,
    pub score: f64,
    pub rank: u32,
}

// --- Raw documents ---
//
// Rows as they come out of the document store, before any aggregation.
// Conversion failures at this layer are skipped with defaults, never fatal.

#[derive(Debug, Clone, Deserialize)]
pub struct UserDoc {
    pub user_id: UserId,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub interests: String,
    #[serde(default)]
    pub num_posts: u32,
    #[serde(default)]
    pub num_comments: u32,
    #[serde(default)]
    pub communities_followed: Vec<String>,
}

impl UserDoc {
    /// Text fed to the embedding model for the vector path.
    pub fn profile_text(&self) -> String {
        format!("{} {} {}", self.username, self.bio, self.interests)
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostDoc {
    pub post_id: ItemId,
    #[serde(default)]
    pub community_id: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default = "default_status")]
    pub status: String,
}

fn default_status() -> String {
    "active".to_string()
}

/// One user's nested vote document. Only the post-target block participates
/// in the interaction matrix; comment votes are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct VoteDoc {
    pub user_id: UserId,
    #[serde(default)]
    pub post: Option<VoteBlock>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoteBlock {
    #[serde(default)]
    pub target_ids: Vec<ItemId>,
    #[serde(default)]
    pub value: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_text_joins_fields_and_trims() {
        let user = UserDoc {
            user_id: "u1".into(),
            username: "ada".to_string(),
            bio: String::new(),
            interests: "chess".to_string(),
            num_posts: 0,
            num_comments: 0,
            communities_followed: vec![],
        };
        assert_eq!(user.profile_text(), "ada  chess");

        let blank = UserDoc {
            user_id: "u2".into(),
            username: String::new(),
            bio: String::new(),
            interests: String::new(),
            num_posts: 0,
            num_comments: 0,
            communities_followed: vec![],
        };
        assert_eq!(blank.profile_text(), "");
    }

    #[test]
    fn ids_serialize_transparently() {
        let id: ItemId = "p42".into();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"p42\"");
        let back: ItemId = serde_json::from_str("\"p42\"").unwrap();
        assert_eq!(back, id);
    }
}
