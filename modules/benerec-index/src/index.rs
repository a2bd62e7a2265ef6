//! Flat inner-product k-NN index over L2-normalized item embeddings.
//!
//! Distance convention: every vector is normalized at build/query time, so the
//! inner product equals cosine similarity. `search` reports
//! `distance = 1.0 - cosine`, i.e. distance grows as similarity falls, and
//! results come back in descending-similarity order. Downstream scoring uses
//! `score = 1 / (1 + distance)`, which is monotonic in similarity under this
//! convention.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use benerec_common::ItemId;

const MAGIC: &[u8; 4] = b"BRIX";
const VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("embedding width {got} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("cannot build an index from an empty vector set")]
    EmptyInput,

    #[error("{vectors} vectors but {ids} ids")]
    IdCountMismatch { vectors: usize, ids: usize },

    #[error("index not built; call build() or load() first")]
    NotBuilt,

    #[error("corrupt index files: {0}")]
    CorruptIndex(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One search result. Lower `distance` means more similar.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub distance: f32,
    pub item_id: ItemId,
}

/// Exact k-NN search structure. Append-only at build time, replaced wholesale
/// on reload, never mutated in place.
pub struct VectorIndex {
    inner: Option<FlatIndex>,
}

struct FlatIndex {
    dim: usize,
    /// Row-major normalized vectors, `ids.len() * dim` entries.
    vectors: Vec<f32>,
    ids: Vec<ItemId>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self { inner: None }
    }

    pub fn len(&self) -> usize {
        self.inner.as_ref().map(|i| i.ids.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Embedding width, fixed at build time. `None` before build/load.
    pub fn dim(&self) -> Option<usize> {
        self.inner.as_ref().map(|i| i.dim)
    }

    /// L2-normalize every vector and build the search structure.
    pub fn build(&mut self, vectors: Vec<Vec<f32>>, ids: Vec<ItemId>) -> Result<(), IndexError> {
        if vectors.is_empty() {
            return Err(IndexError::EmptyInput);
        }
        if vectors.len() != ids.len() {
            return Err(IndexError::IdCountMismatch {
                vectors: vectors.len(),
                ids: ids.len(),
            });
        }

        let dim = vectors[0].len();
        if dim == 0 {
            return Err(IndexError::EmptyInput);
        }

        let mut flat = Vec::with_capacity(vectors.len() * dim);
        for v in &vectors {
            if v.len() != dim {
                return Err(IndexError::DimensionMismatch {
                    expected: dim,
                    got: v.len(),
                });
            }
            flat.extend(normalized(v));
        }

        self.inner = Some(FlatIndex {
            dim,
            vectors: flat,
            ids,
        });
        Ok(())
    }

    /// Return the `k` nearest items to `query`, most similar first.
    /// If `k` exceeds the number of indexed items, returns all items, ordered.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError> {
        let index = self.inner.as_ref().ok_or(IndexError::NotBuilt)?;
        if query.len() != index.dim {
            return Err(IndexError::DimensionMismatch {
                expected: index.dim,
                got: query.len(),
            });
        }

        let query = normalized(query);

        let mut scored: Vec<(usize, f32)> = index
            .ids
            .iter()
            .enumerate()
            .map(|(i, _)| {
                let row = &index.vectors[i * index.dim..(i + 1) * index.dim];
                let dot: f32 = row.iter().zip(query.iter()).map(|(a, b)| a * b).sum();
                (i, dot)
            })
            .collect();

        // Descending similarity; stable, so equal scores keep insertion order.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(i, dot)| SearchHit {
                distance: 1.0 - dot,
                item_id: index.ids[i].clone(),
            })
            .collect())
    }

    /// Persist the index as a file pair: binary vectors at `path` and the
    /// parallel id list at `<stem>_ids.json`.
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        let index = self.inner.as_ref().ok_or(IndexError::NotBuilt)?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = fs::File::create(path)?;
        file.write_all(MAGIC)?;
        file.write_all(&VERSION.to_le_bytes())?;
        file.write_all(&(index.dim as u32).to_le_bytes())?;
        file.write_all(&(index.ids.len() as u32).to_le_bytes())?;
        for v in &index.vectors {
            file.write_all(&v.to_le_bytes())?;
        }

        let ids_json = serde_json::to_string(&index.ids)
            .map_err(|e| IndexError::CorruptIndex(format!("id serialization failed: {e}")))?;
        fs::write(ids_path(path), ids_json)?;

        info!(items = index.ids.len(), dim = index.dim, path = %path.display(), "Vector index saved");
        Ok(())
    }

    /// Restore an index + id list as a unit. Any partial or mismatched pair
    /// is `CorruptIndex`, never a silently truncated index.
    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let mut file = fs::File::open(path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)
            .map_err(|_| IndexError::CorruptIndex("truncated header".to_string()))?;
        if &magic != MAGIC {
            return Err(IndexError::CorruptIndex("bad magic bytes".to_string()));
        }

        let version = read_u32(&mut file)?;
        if version != VERSION {
            return Err(IndexError::CorruptIndex(format!(
                "unsupported index version {version}"
            )));
        }

        let dim = read_u32(&mut file)? as usize;
        let count = read_u32(&mut file)? as usize;
        if dim == 0 {
            return Err(IndexError::CorruptIndex("zero dimension".to_string()));
        }

        let mut payload = Vec::new();
        file.read_to_end(&mut payload)?;
        if payload.len() != count * dim * 4 {
            return Err(IndexError::CorruptIndex(format!(
                "vector payload is {} bytes, expected {}",
                payload.len(),
                count * dim * 4
            )));
        }

        let vectors: Vec<f32> = payload
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        let ids_raw = fs::read_to_string(ids_path(path))
            .map_err(|e| IndexError::CorruptIndex(format!("missing id list: {e}")))?;
        let ids: Vec<ItemId> = serde_json::from_str(&ids_raw)
            .map_err(|e| IndexError::CorruptIndex(format!("unreadable id list: {e}")))?;

        if ids.len() != count {
            return Err(IndexError::CorruptIndex(format!(
                "{count} vectors but {} ids",
                ids.len()
            )));
        }

        info!(items = count, dim, path = %path.display(), "Vector index loaded");
        Ok(Self {
            inner: Some(FlatIndex { dim, vectors, ids }),
        })
    }
}

impl Default for VectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Sibling id-list path: `models/index.bin` → `models/index_ids.json`.
fn ids_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "index".to_string());
    path.with_file_name(format!("{stem}_ids.json"))
}

fn normalized(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

fn read_u32(file: &mut fs::File) -> Result<u32, IndexError> {
    let mut buf = [0u8; 4];
    file.read_exact(&mut buf)
        .map_err(|_| IndexError::CorruptIndex("truncated header".to_string()))?;
    Ok(u32::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_index(vectors: Vec<Vec<f32>>, ids: &[&str]) -> VectorIndex {
        let mut index = VectorIndex::new();
        index
            .build(vectors, ids.iter().map(|s| ItemId::from(*s)).collect())
            .unwrap();
        index
    }

    #[test]
    fn search_orders_by_descending_similarity() {
        let index = build_index(
            vec![
                vec![1.0, 0.0, 0.0],
                vec![0.0, 1.0, 0.0],
                vec![0.9, 0.1, 0.0],
            ],
            &["a", "b", "c"],
        );

        let hits = index.search(&[1.0, 0.0, 0.0], 3).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.item_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);

        // Distance grows as similarity falls
        assert!(hits[0].distance < hits[1].distance);
        assert!(hits[1].distance < hits[2].distance);
        assert!(hits[0].distance.abs() < 1e-5);
    }

    #[test]
    fn k_larger_than_catalog_returns_everything() {
        let index = build_index(vec![vec![1.0, 0.0], vec![0.0, 1.0]], &["a", "b"]);
        let hits = index.search(&[1.0, 0.0], 50).unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn search_before_build_is_not_built() {
        let index = VectorIndex::new();
        assert!(matches!(
            index.search(&[1.0, 0.0], 5),
            Err(IndexError::NotBuilt)
        ));
    }

    #[test]
    fn build_rejects_inconsistent_widths() {
        let mut index = VectorIndex::new();
        let result = index.build(
            vec![vec![1.0, 0.0], vec![1.0, 0.0, 0.0]],
            vec!["a".into(), "b".into()],
        );
        assert!(matches!(
            result,
            Err(IndexError::DimensionMismatch { expected: 2, got: 3 })
        ));
    }

    #[test]
    fn build_rejects_empty_input() {
        let mut index = VectorIndex::new();
        assert!(matches!(
            index.build(vec![], vec![]),
            Err(IndexError::EmptyInput)
        ));
    }

    #[test]
    fn query_dimension_is_checked() {
        let index = build_index(vec![vec![1.0, 0.0]], &["a"]);
        assert!(matches!(
            index.search(&[1.0, 0.0, 0.0], 1),
            Err(IndexError::DimensionMismatch { expected: 2, got: 3 })
        ));
    }

    #[test]
    fn save_load_round_trip_preserves_search_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.bin");

        let index = build_index(
            vec![
                vec![1.0, 0.0, 0.0],
                vec![0.0, 1.0, 0.0],
                vec![0.7, 0.7, 0.0],
            ],
            &["a", "b", "c"],
        );
        let before = index.search(&[0.8, 0.2, 0.0], 3).unwrap();

        index.save(&path).unwrap();
        let restored = VectorIndex::load(&path).unwrap();
        let after = restored.search(&[0.8, 0.2, 0.0], 3).unwrap();

        let before_ids: Vec<&str> = before.iter().map(|h| h.item_id.as_str()).collect();
        let after_ids: Vec<&str> = after.iter().map(|h| h.item_id.as_str()).collect();
        assert_eq!(before_ids, after_ids);
    }

    #[test]
    fn load_with_missing_id_list_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.bin");

        let index = build_index(vec![vec![1.0, 0.0]], &["a"]);
        index.save(&path).unwrap();
        std::fs::remove_file(dir.path().join("index_ids.json")).unwrap();

        assert!(matches!(
            VectorIndex::load(&path),
            Err(IndexError::CorruptIndex(_))
        ));
    }

    #[test]
    fn load_with_mismatched_id_count_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.bin");

        let index = build_index(vec![vec![1.0, 0.0], vec![0.0, 1.0]], &["a", "b"]);
        index.save(&path).unwrap();
        std::fs::write(dir.path().join("index_ids.json"), "[\"a\"]").unwrap();

        assert!(matches!(
            VectorIndex::load(&path),
            Err(IndexError::CorruptIndex(_))
        ));
    }

    #[test]
    fn load_with_truncated_payload_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.bin");

        let index = build_index(vec![vec![1.0, 0.0], vec![0.0, 1.0]], &["a", "b"]);
        index.save(&path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 4]).unwrap();

        assert!(matches!(
            VectorIndex::load(&path),
            Err(IndexError::CorruptIndex(_))
        ));
    }
}
