pub mod cache;
pub mod documents;

pub use cache::{MemoryCache, RecommendationCache, RedisCache};
pub use documents::{DocumentStore, PgDocumentStore};
