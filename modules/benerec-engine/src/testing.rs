// Test mocks for the recommendation engine.
//
// Two mocks matching the two external trait boundaries:
// - MockDocumentStore (DocumentStore) — in-memory user/post/vote collections
// - FixedEmbedder (TextEmbedder) — deterministic hash-based vectors
//
// Plus builder helpers for constructing UserDoc, PostDoc, and VoteDoc rows.
// Everything is deterministic: no network, no database.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use anyhow::{bail, Result};
use async_trait::async_trait;

use benerec_common::{ItemId, PostDoc, UserDoc, UserId, VoteBlock, VoteDoc};
use benerec_index::TextEmbedder;
use benerec_store::DocumentStore;

/// Standard embedding dimension for test vectors.
pub const TEST_EMBEDDING_DIM: usize = 64;

// ---------------------------------------------------------------------------
// MockDocumentStore
// ---------------------------------------------------------------------------

/// In-memory document store. Builder pattern: `.with_user()`, `.with_post()`,
/// `.with_vote()`. `failing()` makes every fetch return a connectivity error.
pub struct MockDocumentStore {
    users: Vec<UserDoc>,
    posts: Vec<PostDoc>,
    votes: Vec<VoteDoc>,
    failing: bool,
}

impl MockDocumentStore {
    pub fn new() -> Self {
        Self {
            users: Vec::new(),
            posts: Vec::new(),
            votes: Vec::new(),
            failing: false,
        }
    }

    pub fn with_user(mut self, user: UserDoc) -> Self {
        self.users.push(user);
        self
    }

    pub fn with_post(mut self, post: PostDoc) -> Self {
        self.posts.push(post);
        self
    }

    pub fn with_vote(mut self, vote: VoteDoc) -> Self {
        self.votes.push(vote);
        self
    }

    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }
}

impl Default for MockDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MockDocumentStore {
    async fn get_users(&self) -> Result<Vec<UserDoc>> {
        if self.failing {
            bail!("MockDocumentStore: simulated connectivity failure");
        }
        Ok(self.users.clone())
    }

    async fn get_user(&self, user_id: &UserId) -> Result<Option<UserDoc>> {
        if self.failing {
            bail!("MockDocumentStore: simulated connectivity failure");
        }
        Ok(self.users.iter().find(|u| &u.user_id == user_id).cloned())
    }

    async fn get_posts(&self) -> Result<Vec<PostDoc>> {
        if self.failing {
            bail!("MockDocumentStore: simulated connectivity failure");
        }
        Ok(self.posts.clone())
    }

    async fn get_votes(&self) -> Result<Vec<VoteDoc>> {
        if self.failing {
            bail!("MockDocumentStore: simulated connectivity failure");
        }
        Ok(self.votes.clone())
    }
}

// ---------------------------------------------------------------------------
// FixedEmbedder
// ---------------------------------------------------------------------------

/// Deterministic embedder: the vector is derived from a hash of the text,
/// so equal texts embed identically across runs. `failing_on` makes any
/// text containing the marker return an error, for failure-path tests.
pub struct FixedEmbedder {
    dim: usize,
    fail_marker: Option<String>,
}

impl FixedEmbedder {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            fail_marker: None,
        }
    }

    pub fn failing_on(mut self, marker: &str) -> Self {
        self.fail_marker = Some(marker.to_string());
        self
    }

    fn vector_for(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(marker) = &self.fail_marker {
            if text.contains(marker) {
                bail!("FixedEmbedder: simulated embedding failure for {text:?}");
            }
        }
        Ok((0..self.dim)
            .map(|i| {
                let mut hasher = DefaultHasher::new();
                text.hash(&mut hasher);
                i.hash(&mut hasher);
                // Map the hash into [-1, 1].
                (hasher.finish() % 2000) as f32 / 1000.0 - 1.0
            })
            .collect())
    }
}

#[async_trait]
impl TextEmbedder for FixedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.vector_for(text)
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.vector_for(t)).collect()
    }
}

// ---------------------------------------------------------------------------
// Document builders
// ---------------------------------------------------------------------------

pub struct UserDocBuilder {
    doc: UserDoc,
}

pub fn user_doc(id: &str) -> UserDocBuilder {
    UserDocBuilder {
        doc: UserDoc {
            user_id: id.into(),
            username: String::new(),
            bio: String::new(),
            interests: String::new(),
            num_posts: 0,
            num_comments: 0,
            communities_followed: Vec::new(),
        },
    }
}

impl UserDocBuilder {
    pub fn username(mut self, username: &str) -> Self {
        self.doc.username = username.to_string();
        self
    }

    pub fn bio(mut self, bio: &str) -> Self {
        self.doc.bio = bio.to_string();
        self
    }

    pub fn interests(mut self, interests: &str) -> Self {
        self.doc.interests = interests.to_string();
        self
    }

    pub fn posts(mut self, n: u32) -> Self {
        self.doc.num_posts = n;
        self
    }

    pub fn comments(mut self, n: u32) -> Self {
        self.doc.num_comments = n;
        self
    }

    pub fn communities(mut self, communities: &[&str]) -> Self {
        self.doc.communities_followed = communities.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn build(self) -> UserDoc {
        self.doc
    }
}

pub struct PostDocBuilder {
    doc: PostDoc,
}

pub fn post_doc(id: &str) -> PostDocBuilder {
    PostDocBuilder {
        doc: PostDoc {
            post_id: id.into(),
            community_id: String::new(),
            score: 0.0,
            status: "active".to_string(),
        },
    }
}

impl PostDocBuilder {
    pub fn community(mut self, community_id: &str) -> Self {
        self.doc.community_id = community_id.to_string();
        self
    }

    pub fn score(mut self, score: f64) -> Self {
        self.doc.score = score;
        self
    }

    pub fn status(mut self, status: &str) -> Self {
        self.doc.status = status.to_string();
        self
    }

    pub fn build(self) -> PostDoc {
        self.doc
    }
}

pub fn vote_doc(user_id: &str, target_ids: &[&str], value: i32) -> VoteDoc {
    VoteDoc {
        user_id: user_id.into(),
        post: Some(VoteBlock {
            target_ids: target_ids.iter().map(|t| ItemId::from(*t)).collect(),
            value,
        }),
    }
}
