//! In-process approximate-nearest-neighbour index over memory embeddings.
//!
//! HNSW with cosine distance. The graph supports insert but not removal, so
//! deleted or replaced entries are tombstoned in the id map and filtered out
//! of search results; the index is rebuilt from the store at startup, which
//! also drops accumulated tombstones.

use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use anndists::dist::DistCosine;
use hnsw_rs::hnsw::Hnsw;

#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub entry_id: i64,
    /// Cosine similarity in [-1, 1]; 1.0 = identical direction.
    pub similarity: f32,
}

pub struct MemoryIndex {
    hnsw: RwLock<Hnsw<'static, f32, DistCosine>>,
    /// HNSW internal id → memory entry id. Tombstoned slots map to None.
    slot_to_entry: DashMap<usize, Option<i64>>,
    /// Live entry id → HNSW internal id, for tombstoning on delete/replace.
    entry_to_slot: DashMap<i64, usize>,
    next_slot: AtomicUsize,
    dimensions: usize,
}

// Hnsw synchronizes internally; the RwLock supplies the outer coordination.
unsafe impl Send for MemoryIndex {}
unsafe impl Sync for MemoryIndex {}

const MAX_ELEMENTS: usize = 100_000;

impl MemoryIndex {
    pub fn new(dimensions: usize) -> Self {
        let max_layer = (MAX_ELEMENTS as f64).log2().ceil() as usize;
        let max_layer = max_layer.clamp(4, 16);
        let hnsw = Hnsw::new(max_layer, MAX_ELEMENTS, 16, 200, DistCosine {});

        Self {
            hnsw: RwLock::new(hnsw),
            slot_to_entry: DashMap::new(),
            entry_to_slot: DashMap::new(),
            next_slot: AtomicUsize::new(0),
            dimensions,
        }
    }

    /// Insert a vector for an entry. An existing vector for the same entry
    /// is tombstoned first, so updates never resurface stale content.
    pub fn insert(&self, entry_id: i64, embedding: &[f32]) {
        debug_assert_eq!(embedding.len(), self.dimensions);
        self.remove(entry_id);

        let slot = self.next_slot.fetch_add(1, Ordering::Relaxed);
        let vector = embedding.to_vec();
        if let Ok(hnsw) = self.hnsw.read() {
            hnsw.insert((&vector, slot));
        }
        self.slot_to_entry.insert(slot, Some(entry_id));
        self.entry_to_slot.insert(entry_id, slot);
    }

    pub fn remove(&self, entry_id: i64) {
        if let Some((_, slot)) = self.entry_to_slot.remove(&entry_id) {
            self.slot_to_entry.insert(slot, None);
        }
    }

    pub fn len(&self) -> usize {
        self.entry_to_slot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entry_to_slot.is_empty()
    }

    /// Top-`k` live entries by descending cosine similarity. Oversamples the
    /// graph search to compensate for tombstones among the neighbours.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<IndexHit> {
        if k == 0 || self.entry_to_slot.is_empty() {
            return Vec::new();
        }

        let oversample = (k * 2 + 16).min(MAX_ELEMENTS);
        let ef_search = oversample.max(32);

        let neighbours = match self.hnsw.read() {
            Ok(hnsw) => hnsw.search(query, oversample, ef_search),
            Err(_) => return Vec::new(),
        };

        let mut hits: Vec<IndexHit> = neighbours
            .into_iter()
            .filter_map(|n| {
                let entry_id = (*self.slot_to_entry.get(&n.d_id)?.value())?;
                Some(IndexHit {
                    entry_id,
                    // DistCosine is 1 - cos(a, b).
                    similarity: 1.0 - n.distance,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[hot] = 1.0;
        v
    }

    #[test]
    fn finds_exact_match_first() {
        let index = MemoryIndex::new(8);
        for i in 0..8 {
            index.insert(i as i64, &unit(8, i));
        }

        let hits = index.search(&unit(8, 3), 3);
        assert_eq!(hits[0].entry_id, 3);
        assert!((hits[0].similarity - 1.0).abs() < 0.001);
    }

    #[test]
    fn tombstoned_entries_never_surface() {
        let index = MemoryIndex::new(8);
        index.insert(1, &unit(8, 0));
        index.insert(2, &unit(8, 1));
        index.remove(1);

        let hits = index.search(&unit(8, 0), 5);
        assert!(hits.iter().all(|h| h.entry_id != 1));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn reinsert_replaces_old_vector() {
        let index = MemoryIndex::new(8);
        index.insert(1, &unit(8, 0));
        index.insert(1, &unit(8, 7));

        let hits = index.search(&unit(8, 7), 1);
        assert_eq!(hits[0].entry_id, 1);
        assert!((hits[0].similarity - 1.0).abs() < 0.001);

        // The old direction no longer matches entry 1 at full similarity.
        let stale = index.search(&unit(8, 0), 1);
        assert!(stale.is_empty() || stale[0].similarity < 0.5);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn empty_index_returns_nothing() {
        let index = MemoryIndex::new(8);
        assert!(index.search(&unit(8, 0), 5).is_empty());
    }
}
