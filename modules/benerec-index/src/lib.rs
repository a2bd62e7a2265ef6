pub mod embedder;
pub mod index;

pub use embedder::{Embedder, TextEmbedder};
pub use index::{IndexError, SearchHit, VectorIndex};
